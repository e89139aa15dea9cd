mod cli;
mod config;
mod flatten;
mod logging;
mod report;
mod runner;
mod templates;

fn main() -> anyhow::Result<()> {
    let app = cli::parse();
    logging::init(app.verbose);
    runner::run(app)
}
