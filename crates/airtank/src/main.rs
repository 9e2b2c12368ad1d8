mod runtime;

fn main() {
    if let Err(err) = runtime::run_from_args() {
        eprintln!("airtank: {err}");
        std::process::exit(1);
    }
}
