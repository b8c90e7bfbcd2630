//! VisionML CLI
//!
//! Segment-by-point, segment-by-box, background removal and inpainting on
//! image files.

fn main() -> anyhow::Result<()> {
    visionml::cli::main()
}
