//
// main.rs
//
// Command line front end of the heron analysis core
//

use std::env;

use heron::cli::{index_stats, symbols, watch};

fn print_usage() {
    println!(
        "heron {}, an incremental analysis core for Kotlin workspaces.",
        env!("CARGO_PKG_VERSION")
    );
    print!(
        r#"
Usage: heron <COMMAND> [OPTIONS]

Commands:

index <path> [--csv]              Load and index a workspace, reporting pass timings
symbols <path> <prefix>           Print indexed declarations starting with <prefix>
    [--receiver <type>]           Only extensions on <type>
    [--limit <n>]                 At most <n> results
    [--substring]                 Match <prefix> anywhere in the name
watch <path>                      Follow changes on disk and print diagnostics

Every command accepts --settings <file.json> with the editor's `heron` settings.

Other options:

--version                         Print the version
--help                            Print this help message

"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut argv = env::args();
    argv.next(); // skip executable name

    let Some(command) = argv.next() else {
        print_usage();
        return Ok(());
    };

    match command.as_str() {
        "--version" => {
            println!("heron {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "--help" => {
            print_usage();
            Ok(())
        }
        "index" => {
            let args = index_stats::parse_args(&mut argv).map_err(anyhow::Error::msg)?;
            env_logger::init();
            let results = index_stats::run_index_stats(&args).await?;
            if args.csv {
                index_stats::print_results_csv(&results);
            } else {
                index_stats::print_results(&results);
            }
            Ok(())
        }
        "symbols" => {
            let args = symbols::parse_args(&mut argv).map_err(anyhow::Error::msg)?;
            env_logger::init();
            let found = symbols::run_symbols(&args).await?;
            symbols::print_declarations(&found);
            Ok(())
        }
        "watch" => {
            let args = watch::parse_args(&mut argv).map_err(anyhow::Error::msg)?;
            env_logger::init();
            watch::run_watch(&args).await
        }
        other => Err(anyhow::anyhow!("Unknown argument: '{other}'")),
    }
}
