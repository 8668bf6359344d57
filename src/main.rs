use gpt_rs::{GenerateOptions, GptConfig, GptEngine};
use std::env;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!(
            "Usage: {} (--random | <checkpoint> <vocabulary>) [prompt] [options]",
            args[0]
        );
        eprintln!("Options:");
        eprintln!("  --temp <float>    Temperature (default: 0.9, 0 = greedy)");
        eprintln!("  --topk <int>      Top-k truncation (default: off)");
        eprintln!("  --topp <float>    Top-p sampling (default: off)");
        eprintln!("  --steps <int>     Max tokens to generate (default: 256)");
        eprintln!("  --seed <int>      Random seed (default: 0)");
        eprintln!("  --session <str>   Session id (default: \"cli\")");
        std::process::exit(1);
    }

    // Positional arguments: either --random, or checkpoint + vocabulary,
    // followed by an optional prompt.
    let engine;
    let prompt_idx;
    if args[1] == "--random" {
        eprintln!("Initializing random weights (no learned knowledge)");
        engine = GptEngine::random(GptConfig::tiny(), 0);
        prompt_idx = 2;
    } else {
        if args.len() < 3 {
            eprintln!("Missing vocabulary path");
            std::process::exit(1);
        }
        eprintln!("Loading model from: {}", args[1]);
        engine = GptEngine::from_files(&args[1], &args[2])?;
        prompt_idx = 3;
    }
    let config = engine.config();
    eprintln!(
        "Config: dim={}, layers={}, heads={}, vocab={}, context={}",
        config.dim, config.n_layers, config.n_heads, config.vocab_size, config.max_seq_len
    );

    let prompt = args
        .get(prompt_idx)
        .filter(|a| !a.starts_with("--"))
        .map(|s| s.as_str())
        .unwrap_or("");

    // Parse optional arguments
    let mut options = GenerateOptions::default();
    let mut session = "cli".to_string();

    let mut i = if prompt.is_empty() { prompt_idx } else { prompt_idx + 1 };
    while i < args.len() {
        match args[i].as_str() {
            "--temp" => {
                options.temperature = args.get(i + 1).and_then(|s| s.parse().ok()).unwrap_or(0.9);
                i += 2;
            }
            "--topk" => {
                options.top_k = args.get(i + 1).and_then(|s| s.parse().ok());
                i += 2;
            }
            "--topp" => {
                options.top_p = args.get(i + 1).and_then(|s| s.parse().ok()).unwrap_or(0.0);
                i += 2;
            }
            "--steps" => {
                options.max_new_tokens =
                    args.get(i + 1).and_then(|s| s.parse().ok()).unwrap_or(256);
                i += 2;
            }
            "--seed" => {
                options.seed = args.get(i + 1).and_then(|s| s.parse().ok()).unwrap_or(0);
                i += 2;
            }
            "--session" => {
                if let Some(name) = args.get(i + 1) {
                    session = name.clone();
                }
                i += 2;
            }
            _ => i += 1,
        }
    }

    let outcome = engine.generate(&session, prompt, &options)?;

    println!("{}", outcome.generated_text);
    eprintln!(
        "[{} prompt tokens, {} generated, stop: {}]",
        outcome.prompt_tokens, outcome.tokens_generated, outcome.stop_reason
    );

    Ok(())
}
