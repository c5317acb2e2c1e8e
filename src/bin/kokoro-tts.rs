use std::io::Read;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand};

use kokoro_tts::{SynthesisRequest, Synthesizer, SynthesizerConfig};

#[derive(Parser, Debug)]
#[command(name = "kokoro-tts")]
#[command(author, version, about = "Kokoro text-to-speech", long_about = None)]
struct Cli {
    /// Asset directory (model, config.json, tokenizer.json, voices)
    #[arg(long, short = 'a', global = true, env = "KOKORO_ASSETS")]
    assets: Option<PathBuf>,

    /// JSON configuration file; `--assets` overrides its `assets_dir`
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Synthesize text to a WAV file
    Say {
        /// Text to speak. Read from --file or stdin when omitted.
        text: Option<String>,

        /// Read the text from this file
        #[arg(long, short = 'f', conflicts_with = "text")]
        file: Option<PathBuf>,

        /// Output WAV path
        #[arg(long, short = 'o', default_value = "output.wav")]
        output: PathBuf,

        /// Voice name; the configured default voice when omitted
        #[arg(long)]
        voice: Option<String>,

        #[arg(long, default_value_t = 1.0)]
        speed: f32,

        /// Language code; derived from the voice when omitted
        #[arg(long)]
        lang: Option<String>,
    },
    /// List available voices
    Voices,
    /// Run the HTTP server
    Serve {
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        #[arg(long, short = 'p', default_value_t = 8080)]
        port: u16,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let level = if cli.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let mut config = match &cli.config {
        Some(path) => SynthesizerConfig::from_json_file(path)?,
        None => SynthesizerConfig::default(),
    };
    if let Some(assets) = cli.assets {
        config.assets_dir = assets;
    }

    let load_start = Instant::now();
    let synth = Synthesizer::load(config)?;
    log::info!("Model loaded in {:.2?}", load_start.elapsed());

    match cli.command {
        Command::Say {
            text,
            file,
            output,
            voice,
            speed,
            lang,
        } => {
            let text = match (text, file) {
                (Some(text), _) => text,
                (None, Some(path)) => std::fs::read_to_string(path)?,
                (None, None) => {
                    let mut buf = String::new();
                    std::io::stdin().read_to_string(&mut buf)?;
                    buf
                }
            };

            let request = SynthesisRequest {
                voice,
                speed: Some(speed),
                lang,
                ..SynthesisRequest::new(text)
            };

            let synth_start = Instant::now();
            let result = synth.synthesize(&request)?;
            let synth_dur = synth_start.elapsed();
            let speedup = result.duration_secs() / synth_dur.as_secs_f64();
            println!(
                "Synthesized {:.2}s audio in {:.2?} ({:.1}x real-time)",
                result.duration_secs(),
                synth_dur,
                speedup
            );

            std::fs::write(&output, result.wav.as_bytes())?;
            println!("Saved to {}", output.display());
        }
        Command::Voices => {
            for voice in synth.list_voices() {
                println!("{voice}");
            }
        }
        Command::Serve { host, port } => {
            let addr: SocketAddr = format!("{host}:{port}").parse()?;
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            runtime.block_on(kokoro_tts::server::serve(Arc::new(synth), addr))?;
        }
    }

    Ok(())
}
