use clap::Parser;

fn main() {
    let cli = streamseekctl::Cli::parse();
    if let Err(err) = streamseekctl::run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
