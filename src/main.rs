fn main() {
    if let Err(e) = qtask::run() {
        eprintln!("Error: {e:?}");
        std::process::exit(1);
    }
}
