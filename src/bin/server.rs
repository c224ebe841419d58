use clap::Parser;
use console::style;
use httprunner::{Cli, logging, server};

#[actix_web::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_logger(cli.verbose);

    let result = match cli.into_config() {
        Ok(config) => server::serve(config).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        eprintln!("{} {}", style("error:").red().bold(), e);
        std::process::exit(1);
    }
}
