fn main() {
    if let Err(err) = bray_lib::run() {
        eprintln!("bray: {err:#}");
        std::process::exit(1);
    }
}
