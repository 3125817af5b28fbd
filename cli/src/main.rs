fn main() {
    if let Err(e) = vtriples_cli::run() {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
