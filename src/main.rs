use std::path::PathBuf;

use gif_picker::app::RunOptions;
use gif_picker::model::Section;

const HELP: &str = "gif-picker: headless GIF picker session against the built-in catalogue.

  --search TEXT        Type TEXT into the search box
  --section NAME       Pick a category (trending, love, thumbs-up, ...)
  --scroll PX          Scroll the result list to PX
  --viewport PX        Viewport height (default 600)
  --select INDEX       Select the item at INDEX
  --config PATH        Read configuration from PATH
  --json               Print the session as JSON
  --http-media         Download previews over HTTP
  --version, -V        Show version and exit
  --help,    -h        Show this help message";

enum Cli {
    Exit,
    Run(RunOptions),
}

fn main() {
    let options = match handle_cli_flags(std::env::args().skip(1)) {
        Ok(Cli::Exit) => return,
        Ok(Cli::Run(options)) => options,
        Err(message) => {
            eprintln!("error: {message}\n\n{HELP}");
            std::process::exit(2);
        }
    };

    if let Err(err) = gif_picker::run(options) {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

fn handle_cli_flags(args: impl Iterator<Item = String>) -> Result<Cli, String> {
    let mut options = RunOptions::default();
    let mut args = args;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("gif-picker {}", gif_picker::VERSION);
                return Ok(Cli::Exit);
            }
            "--help" | "-h" => {
                println!("{HELP}");
                return Ok(Cli::Exit);
            }
            "--json" => options.json = true,
            "--http-media" => options.http_media = true,
            "--search" => options.search = Some(value(&mut args, &arg)?),
            "--section" => {
                let raw = value(&mut args, &arg)?;
                let section = raw.parse::<Section>().map_err(|err| err.to_string())?;
                options.section = Some(section);
            }
            "--scroll" => options.scroll = Some(number(&mut args, &arg)?),
            "--viewport" => options.viewport = number(&mut args, &arg)?,
            "--select" => {
                let raw = value(&mut args, &arg)?;
                let index = raw
                    .parse::<usize>()
                    .map_err(|_| format!("{arg} expects an index, got {raw:?}"))?;
                options.select = Some(index);
            }
            "--config" => options.config_file = Some(PathBuf::from(value(&mut args, &arg)?)),
            other => return Err(format!("unknown argument {other:?}")),
        }
    }
    Ok(Cli::Run(options))
}

fn value(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<String, String> {
    args.next().ok_or_else(|| format!("{flag} expects a value"))
}

fn number(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<f32, String> {
    let raw = value(args, flag)?;
    raw.parse::<f32>()
        .ok()
        .filter(|value| value.is_finite() && *value >= 0.0)
        .ok_or_else(|| format!("{flag} expects a non-negative number, got {raw:?}"))
}
