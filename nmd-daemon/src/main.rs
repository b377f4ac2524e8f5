fn main() {
    if let Err(e) = nmd_daemon::run() {
        eprintln!("nmd: {e:#}");
        std::process::exit(1);
    }
}
