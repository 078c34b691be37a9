use anyhow::{anyhow, Result};
use clap::Parser;
use lljtran::{CropRect, LosslessJpeg, Options, ReadDepth, Transform, WriteConfig};
use log::{info, warn};
use std::fs::File;
use std::io::{BufWriter, Write};

#[derive(Parser)]
#[clap(version, about = "Lossless rotation, flipping and cropping of baseline JPEG files")]
struct Opts {
    #[clap(subcommand)]
    subcommand: SubCommand,
}

#[derive(Parser)]
enum SubCommand {
    /// Print geometry, tables and metadata of a JPEG file
    Info(Info),

    /// Rotate, flip, transpose or crop without recompressing
    Transform(TransformArgs),

    /// Undo the rotation recorded in the EXIF orientation tag and reset the tag
    AutoRotate(AutoRotate),

    /// Extract the embedded EXIF thumbnail
    Thumbnail(Thumbnail),
}

#[derive(Parser)]
struct Info {
    /// Path to .jpg file
    path: String,
}

#[derive(Parser)]
struct TransformArgs {
    input: String,
    output: String,

    /// none, flip-h, flip-v, transpose, transverse, rot90, rot180, rot270
    #[clap(long, default_value = "none")]
    op: Transform,

    /// left,top,width,height in pixels; snapped to the MCU grid
    #[clap(long)]
    crop: Option<CropRect>,

    /// Drop partial edge MCUs that cannot be moved exactly
    #[clap(long)]
    trim: bool,

    #[clap(long)]
    no_adjust_edges: bool,

    /// Transform the EXIF thumbnail too
    #[clap(long)]
    thumbnail: bool,

    /// Transform the EXIF orientation tag with the image
    #[clap(long)]
    orientation: bool,

    /// Write optimal Huffman tables
    #[clap(long)]
    optimize: bool,

    /// Restart interval in MCUs; 0 disables restart markers
    #[clap(long)]
    restart: Option<u16>,

    #[clap(long)]
    strip_appxs: bool,

    #[clap(long)]
    strip_comments: bool,

    /// Transform while writing, releasing source rows as they are consumed
    #[clap(long)]
    pull_down: bool,
}

impl TransformArgs {
    fn options(&self) -> Options {
        let mut options = Options::DEFAULTS;
        for (set, flag) in [
            (self.trim, Options::XFORM_TRIM),
            (self.thumbnail, Options::XFORM_THUMBNAIL),
            (self.orientation, Options::XFORM_ORIENTATION),
            (self.optimize, Options::OPTIMIZE_HUFF),
        ] {
            if set {
                options.insert(flag);
            }
        }
        for (set, flag) in [
            (self.no_adjust_edges, Options::XFORM_ADJUST_EDGES),
            (self.strip_appxs, Options::WRITE_APPXS),
            (self.strip_comments, Options::WRITE_COMMENTS),
        ] {
            if set {
                options.remove(flag);
            }
        }
        options
    }
}

#[derive(Parser)]
struct AutoRotate {
    input: String,
    output: String,
}

#[derive(Parser)]
struct Thumbnail {
    input: String,
    output: String,
}

fn open(path: &str, depth: ReadDepth) -> Result<LosslessJpeg> {
    let mut jpeg = LosslessJpeg::from_file_path(path)?;
    jpeg.read(depth, true)?;
    Ok(jpeg)
}

fn create(path: &str) -> Result<BufWriter<File>> {
    Ok(BufWriter::new(File::create(path)?))
}

fn print_info(args: &Info) -> Result<()> {
    let jpeg = open(&args.path, ReadDepth::Header)?;
    let frame = jpeg.frame()?;

    println!("{}: {}x{}, {}", args.path, jpeg.width()?, jpeg.height()?, frame.process().describe());
    println!(
        "MCU {}x{} pixels, {}x{} MCUs",
        jpeg.mcu_width()?,
        jpeg.mcu_height()?,
        jpeg.width_in_mcu()?,
        jpeg.height_in_mcu()?
    );
    for i in 0..jpeg.component_count()? {
        let (h, v) = jpeg.sampling(i)?;
        println!("component {i}: sampling {h}x{v}");
    }
    println!("restart interval {}", jpeg.restart_interval());

    for id in 0..4 {
        if let Some(table) = jpeg.quant_table(id) {
            println!("quantization table {id}:");
            for row in table.natural().chunks(8) {
                let row: Vec<String> = row.iter().map(|q| format!("{q:3}")).collect();
                println!("  {}", row.join(" "));
            }
        }
    }

    if let Some(comment) = jpeg.comment() {
        println!("comment: {comment}");
    }
    if let Some(exif) = jpeg.exif() {
        if let Some(orientation) = exif.orientation() {
            println!("orientation: {orientation:?}");
        }
        print!("{exif}");
    }
    Ok(())
}

fn transform(args: &TransformArgs) -> Result<()> {
    let mut jpeg = open(&args.input, ReadDepth::All)?;
    let options = args.options();
    let op = match args.crop {
        Some(_) => Transform::Crop,
        None => args.op,
    };

    let imperfection = jpeg.check_perfect(op, args.crop.as_ref())?;
    if !imperfection.is_perfect() {
        warn!("{op} cannot move the partial edge MCUs exactly ({imperfection:?})");
    }

    let mut config = WriteConfig::from(options);
    config.restart_interval = args.restart;
    if args.pull_down {
        config.op = op;
        config.crop = args.crop;
        config.pull_down = true;
    } else {
        jpeg.transform_with(op, options, args.crop.as_ref())?;
    }

    let mut out = create(&args.output)?;
    jpeg.save_with(&mut out, &config)?;
    out.flush()?;
    info!("{} bytes written to {}", jpeg.bytes_written(), args.output);
    Ok(())
}

fn auto_rotate(args: &AutoRotate) -> Result<()> {
    let mut jpeg = open(&args.input, ReadDepth::All)?;
    let orientation = jpeg
        .exif()
        .and_then(|exif| exif.orientation())
        .ok_or(anyhow!("{} carries no EXIF orientation", args.input))?;
    let op = orientation.correction();
    info!("{orientation:?} corrected by {op}");

    let options = Options::DEFAULTS | Options::XFORM_ORIENTATION | Options::XFORM_THUMBNAIL;
    jpeg.transform(op, options)?;

    let mut out = create(&args.output)?;
    jpeg.save(&mut out, options)?;
    out.flush()?;
    Ok(())
}

fn thumbnail(args: &Thumbnail) -> Result<()> {
    let jpeg = open(&args.input, ReadDepth::Info)?;
    if jpeg.thumbnail()?.is_none() {
        return Err(anyhow!("{} has no embedded thumbnail", args.input));
    }

    let mut out = create(&args.output)?;
    let written = jpeg.write_thumbnail(&mut out)?;
    out.flush()?;
    info!("{written} thumbnail bytes written to {}", args.output);
    Ok(())
}

fn run() -> Result<()> {
    env_logger::init();

    let opts: Opts = Opts::parse();

    match &opts.subcommand {
        SubCommand::Info(args) => print_info(args),
        SubCommand::Transform(args) => transform(args),
        SubCommand::AutoRotate(args) => auto_rotate(args),
        SubCommand::Thumbnail(args) => thumbnail(args),
    }
}

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
