//! Generate an image while printing progress from `/sdapi/v1/progress`.
//!
//! Requires a running Stable Diffusion WebUI at http://127.0.0.1:7860
//! started with `--api`.
//!
//! ```sh
//! cargo run --example txt2img_progress
//! ```

use sdapi_rs::{ApiEvent, FetcherConfig, GenerationPayload, StableDiffusionApi};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let config = FetcherConfig::builder()
        .with_base_url("http://127.0.0.1:7860")
        .without_cache()
        .build();
    let api = StableDiffusionApi::new(config)?;
    let mut events = api.subscribe();

    let payload = GenerationPayload::new("a lighthouse on a cliff at dusk, oil painting")
        .negative("lowres, blurry, watermark")
        .size(768, 512)
        .steps(30)
        .cfg_scale(6.5)
        .sampler("DPM++ 2M");
    let id = api.generate_txt_image(&payload)?;
    println!("Started generation {id}");

    while let Ok(event) = events.recv().await {
        match event {
            ApiEvent::ImageProgress { data } => {
                let pct = data["progress"].as_f64().unwrap_or(0.0) * 100.0;
                let eta = data["eta_relative"].as_f64().unwrap_or(0.0);
                println!("  {pct:.0}% (eta {eta:.1}s)");
            }
            ApiEvent::ImageGenerated { data, .. } => {
                let images = data["images"].as_array().map_or(0, Vec::len);
                println!("Done! Generated {images} image(s)");
                break;
            }
            ApiEvent::ImageGenerationFailed { message, status, .. } => {
                eprintln!("Failed ({status}): {message}");
                break;
            }
            _ => {}
        }
    }

    api.close();
    Ok(())
}
