use util::HashSet;

/// Every job transitively downstream of `root`, each listed once, in
/// depth-first order. `children` looks up the direct dependents of a job.
///
/// The dependency graph is a DAG, not a tree: a job reachable along several
/// paths is still visited only once.
pub fn descendants<F, E>(root: &str, mut children: F) -> Result<Vec<String>, E>
where
    F: FnMut(&str) -> Result<Vec<String>, E>,
{
    let mut visited: HashSet<String> = HashSet::default();
    visited.insert(root.to_owned());

    let mut found = Vec::new();
    let mut stack = vec![root.to_owned()];
    while let Some(job) = stack.pop() {
        for child in children(&job)? {
            if visited.insert(child.clone()) {
                found.push(child.clone());
                stack.push(child);
            }
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::convert::Infallible;

    fn edges(pairs: &[(&str, &str)]) -> BTreeMap<String, Vec<String>> {
        let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (parent, child) in pairs {
            map.entry(parent.to_string()).or_default().push(child.to_string());
        }
        map
    }

    #[test]
    fn test_diamond_visits_each_once() {
        let g = edges(&[("A", "B"), ("A", "C"), ("B", "D"), ("C", "D"), ("D", "E")]);
        let mut lookups = Vec::new();
        let found = descendants("A", |job| {
            lookups.push(job.to_owned());
            Ok::<_, Infallible>(g.get(job).cloned().unwrap_or_default())
        })
        .unwrap();

        let mut sorted = found.clone();
        sorted.sort();
        assert_eq!(sorted, vec!["B", "C", "D", "E"]);

        lookups.sort();
        assert_eq!(lookups, vec!["A", "B", "C", "D", "E"]);
    }

    #[test]
    fn test_deep_chain() {
        let pairs: Vec<(String, String)> =
            (0..10_000).map(|i| (i.to_string(), (i + 1).to_string())).collect();
        let found = descendants("0", |job| {
            let n: usize = job.parse().unwrap();
            Ok::<_, Infallible>(if n < 10_000 {
                vec![pairs[n].1.clone()]
            } else {
                vec![]
            })
        })
        .unwrap();
        assert_eq!(found.len(), 10_000);
    }

    #[test]
    fn test_lookup_error_propagates() {
        let res = descendants("A", |_| Err::<Vec<String>, _>("db gone"));
        assert_eq!(res, Err("db gone"));
    }
}
