fn main() {
    if let Err(err) = csv_mapper::run() {
        eprintln!("error: {err:#}");
        std::process::exit(csv_mapper::exit_code(&err));
    }
}
