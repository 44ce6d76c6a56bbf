use std::{fs, process};

use kestrel::Vm;

pub fn main() {
    // RUST_LOG=debug for compiler/VM internals
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    // get the path and load the file
    let path = match std::env::args_os().nth(1) {
        Some(path) => path,
        None => {
            eprintln!("Usage: kestrel <script>");
            process::exit(64);
        }
    };

    let source = match fs::read_to_string(&path) {
        Ok(source) => source,
        Err(error) => {
            eprintln!("Could not read {}: {}", path.to_string_lossy(), error);
            process::exit(74);
        }
    };

    // compile and run the file, report any errors
    if let Err(error) = Vm::new().interpret(&source) {
        eprintln!("{}", error);
        process::exit(error.exit_code());
    }
}
