use std::error::Error;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};

use anyhow::anyhow;
use dotenvy::dotenv;
use tracing::{error, info};

mod config;
mod llm;
mod orchestrator;
mod session;
mod styles;
mod utils;

use llm::gemini::GeminiClient;
use llm::image::ImageData;
use orchestrator::{Orchestrator, Phase};
use session::Session;
use styles::STYLE_PRESETS;
use utils::logging::init_logging;

type MainResult = Result<(), Box<dyn Error + Send + Sync>>;

const GENERATION_FAILED_MESSAGE: &str = "Failed to generate headshot. Please try again.";
const EDIT_FAILED_MESSAGE: &str = "Failed to edit headshot. Please try again.";

fn usage() -> &'static str {
    "Usage:\n  headshotgen generate --photo <path|data-url> [--style <id>] [--out <path>] [--interactive]\n  headshotgen styles\n\nUse `headshotgen styles` to list the available style ids. Pass `--out -`\nto print the result as a data URL instead of writing a file."
}

#[derive(Debug)]
struct GenerateArgs {
    photo: String,
    style: Option<String>,
    out: String,
    interactive: bool,
}

fn parse_generate_args(args: &[String]) -> anyhow::Result<GenerateArgs> {
    let mut photo: Option<String> = None;
    let mut style: Option<String> = None;
    let mut out = "headshot.png".to_string();
    let mut interactive = false;

    let mut index = 2;
    while index < args.len() {
        match args[index].as_str() {
            "--photo" => {
                index += 1;
                let value = args
                    .get(index)
                    .ok_or_else(|| anyhow!("Missing value for --photo"))?;
                photo = Some(value.clone());
            }
            "--style" => {
                index += 1;
                let value = args
                    .get(index)
                    .ok_or_else(|| anyhow!("Missing value for --style"))?;
                style = Some(value.clone());
            }
            "--out" => {
                index += 1;
                let value = args
                    .get(index)
                    .ok_or_else(|| anyhow!("Missing value for --out"))?;
                out = value.clone();
            }
            "--interactive" => {
                interactive = true;
            }
            other => {
                return Err(anyhow!("Unknown argument: {other}"));
            }
        }
        index += 1;
    }

    let photo = photo.ok_or_else(|| anyhow!("--photo is required"))?;
    Ok(GenerateArgs {
        photo,
        style,
        out,
        interactive,
    })
}

fn print_styles() {
    println!("Available styles:");
    for style in &STYLE_PRESETS {
        println!(
            "  {} {:<16} {} ({})",
            style.icon, style.id, style.name, style.description
        );
    }
}

/// Output path for the nth edit: `headshot.png` becomes `headshot-edit-1.png`.
fn edit_output_path(out: &str, edit_index: usize) -> PathBuf {
    let base = Path::new(out);
    let stem = base
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("headshot");
    let ext = base.extension().and_then(|s| s.to_str()).unwrap_or("png");
    base.with_file_name(format!("{stem}-edit-{edit_index}.{ext}"))
}

fn write_result(image: &ImageData, out: &str, edit_index: Option<usize>) -> anyhow::Result<()> {
    if out == "-" {
        println!("{}", image.to_data_url());
        return Ok(());
    }
    let path = match edit_index {
        Some(index) => edit_output_path(out, index),
        None => PathBuf::from(out),
    };
    let path = if path.extension().is_none() {
        path.with_extension(image.file_extension())
    } else {
        path
    };
    image.save(&path)?;
    println!("Saved {}", path.display());
    Ok(())
}

fn print_phase(phase: Phase) {
    println!("{}", phase.message());
}

async fn run_generate(args: GenerateArgs) -> MainResult {
    let mut session = Session::new();
    if let Some(style_id) = &args.style {
        session.select_style(style_id)?;
    }

    if args.photo.starts_with("data:") {
        session.set_uploaded(ImageData::from_data_url(&args.photo)?);
    } else {
        session.load_photo(Path::new(&args.photo))?;
    }

    let orchestrator = Orchestrator::new(GeminiClient);

    match session.generate(&orchestrator, print_phase).await {
        Ok(true) => {
            let image = session
                .generated()
                .ok_or_else(|| anyhow!("generation reported success without an image"))?;
            write_result(image, &args.out, None)?;
        }
        Ok(false) => {
            return Err("No photo to work with.".into());
        }
        Err(err) => {
            error!("Generation failed: {err:#}");
            return Err(GENERATION_FAILED_MESSAGE.into());
        }
    }

    if args.interactive {
        run_edit_loop(&mut session, &orchestrator, &args.out).await?;
    }

    Ok(())
}

async fn run_edit_loop(
    session: &mut Session,
    orchestrator: &Orchestrator<GeminiClient>,
    out: &str,
) -> MainResult {
    println!("Enter edit instructions (blank line or 'quit' to finish, 'reset' to discard):");
    let stdin = io::stdin();
    let mut edit_index = 0usize;

    for line in stdin.lock().lines() {
        let line = line?;
        let instruction = line.trim();
        if instruction.is_empty() || instruction.eq_ignore_ascii_case("quit") {
            break;
        }
        if instruction.eq_ignore_ascii_case("reset") {
            session.reset();
            println!("Session cleared.");
            continue;
        }

        session.set_pending_edit(instruction);
        match session.apply_edit(orchestrator, print_phase).await {
            Ok(true) => {
                edit_index += 1;
                let image = session
                    .generated()
                    .ok_or_else(|| anyhow!("edit reported success without an image"))?;
                write_result(image, out, Some(edit_index))?;
            }
            Ok(false) => {
                println!("Nothing to edit.");
            }
            Err(err) => {
                error!("Edit failed: {err:#}");
                println!("{EDIT_FAILED_MESSAGE}");
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> MainResult {
    dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(|value| value.as_str()) {
        Some("styles") => {
            print_styles();
            Ok(())
        }
        Some("generate") => {
            if std::env::var("GEMINI_API_KEY")
                .unwrap_or_default()
                .trim()
                .is_empty()
            {
                return Err("GEMINI_API_KEY is required".into());
            }
            let generate_args = parse_generate_args(&args).map_err(|err| {
                format!("{err}\n\n{}", usage())
            })?;
            let _guards = init_logging();
            info!("Starting headshotgen");
            run_generate(generate_args).await
        }
        Some("--help") | Some("-h") | None => {
            println!("{}", usage());
            Ok(())
        }
        Some(other) => Err(format!("Unknown command: {other}\n\n{}", usage()).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(parts: &[&str]) -> Vec<String> {
        let mut all = vec!["headshotgen".to_string()];
        all.extend(parts.iter().map(|part| part.to_string()));
        all
    }

    #[test]
    fn generate_args_parse_flags() {
        let parsed = parse_generate_args(&args(&[
            "generate",
            "--photo",
            "me.jpg",
            "--style",
            "modern-office",
            "--out",
            "result.png",
            "--interactive",
        ]))
        .unwrap();
        assert_eq!(parsed.photo, "me.jpg");
        assert_eq!(parsed.style.as_deref(), Some("modern-office"));
        assert_eq!(parsed.out, "result.png");
        assert!(parsed.interactive);
    }

    #[test]
    fn generate_args_require_photo() {
        assert!(parse_generate_args(&args(&["generate"])).is_err());
        assert!(parse_generate_args(&args(&["generate", "--photo"])).is_err());
        assert!(parse_generate_args(&args(&["generate", "--photo", "x", "--bogus"])).is_err());
    }

    #[test]
    fn edit_paths_number_sequentially() {
        assert_eq!(
            edit_output_path("headshot.png", 1),
            PathBuf::from("headshot-edit-1.png")
        );
        assert_eq!(
            edit_output_path("out/me.jpg", 3),
            PathBuf::from("out/me-edit-3.jpg")
        );
    }
}
