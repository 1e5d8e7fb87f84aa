use super::super::args::*;

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.cmd {
        Command::Exec(args) => super::exec::run(args).await,
        Command::Run(args) => super::run::run(args),
        Command::Verify(args) => super::verify::run(args),
        Command::Validate(args) => super::validate::run(args),
        Command::Clean(args) => super::clean::run(args),
        Command::Record(args) => super::record::run(args).await,
    }
}
