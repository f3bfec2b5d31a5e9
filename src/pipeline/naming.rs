/// Replace each run of whitespace in `s` with a single `_`.
pub fn sanitize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_space = false;
    for c in s.chars() {
        if c.is_whitespace() {
            if !in_space {
                out.push('_');
            }
            in_space = true;
        } else {
            out.push(c);
            in_space = false;
        }
    }
    out
}

/// Build a task's basename from project, sample and basename override,
/// omitting empty segments.
pub fn namespace(project: &str, sample: &str, basename: &str) -> String {
    let project = sanitize(project);
    let sample = sanitize(sample);
    [project.as_str(), sample.as_str(), basename]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("World domination"), "World_domination");
        assert_eq!(sanitize("a \t b"), "a_b");
        assert_eq!(sanitize("plain"), "plain");
    }

    #[test]
    fn test_namespace() {
        assert_eq!(namespace("World domination", "s1", ""), "World_domination.s1");
        assert_eq!(namespace("", "s1", "align"), "s1.align");
        assert_eq!(namespace("P", "", ""), "P");
        assert_eq!(namespace("", "", ""), "");
    }
}
