use clap::Parser;

mod cli;
mod exit_codes;
mod intercept;
mod session;

use cli::args::Cli;
use cli::commands::dispatch;

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    // Dual-mode dispatch: invoked under any name other than our own, the
    // binary is an interceptor, not a CLI.
    if let Some(alias) = intercept::alias_invocation() {
        let args: Vec<String> = std::env::args().skip(1).collect();
        std::process::exit(intercept::run(&alias, &args));
    }

    let cli = Cli::parse();
    let code = match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("fatal: {e:?}");
            exit_codes::FAILURE
        }
    };
    std::process::exit(code);
}
