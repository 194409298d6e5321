//! cforge binary entry point.

fn main() {
    if let Err(err) = contentforge::cli::run() {
        eprintln!("error: {:#}", err);
        std::process::exit(1);
    }
}
