fn main() {
    if let Err(e) = dcmscrub::run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
