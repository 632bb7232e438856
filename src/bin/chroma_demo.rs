//! Offline chroma-key demo: run a PNG through the frame compositor and
//! save the keyed result with its background turned transparent.

use avatar_kiosk_rs::compositor::{ChromaKeyConfig, FrameCompositor};
use avatar_kiosk_rs::media::{PlaybackEvent, VideoSource};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "chroma_demo", about = "Key the green background out of a PNG")]
struct Args {
    /// Input PNG
    input: String,

    /// Output PNG with alpha
    #[arg(default_value = "keyed.png")]
    output: String,

    /// Minimum green intensity for a background pixel
    #[arg(long, default_value_t = 90)]
    threshold: u8,

    /// How dominant green must be over red and blue
    #[arg(long, default_value_t = 1.5)]
    margin: f32,
}

/// Single-frame source backed by a decoded image
struct PngSource {
    image: image::RgbaImage,
}

impl VideoSource for PngSource {
    fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    fn has_frame(&self) -> bool {
        true
    }

    fn copy_frame_into(&mut self, dest: &mut [u8]) {
        dest.copy_from_slice(self.image.as_raw());
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let image = image::open(&args.input)?.to_rgba8();
    let (width, height) = image.dimensions();
    log::info!("Loaded {} ({}x{})", args.input, width, height);

    let mut source = PngSource { image };
    let mut compositor = FrameCompositor::new(ChromaKeyConfig {
        green_threshold: args.threshold,
        dominance_margin: args.margin,
    });

    compositor.on_playback(PlaybackEvent::Playing);
    compositor.tick(&mut source);

    let (width, height) = compositor.canvas().dimensions();
    let keyed = image::RgbaImage::from_raw(width, height, compositor.canvas().pixels().to_vec())
        .ok_or_else(|| anyhow::anyhow!("canvas buffer size mismatch"))?;
    keyed.save(&args.output)?;

    println!("Keyed {} -> {} ({}x{})", args.input, args.output, width, height);
    Ok(())
}
