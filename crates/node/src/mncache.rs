fn main() {
    if let Err(err) = hodld::run_entry() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}
