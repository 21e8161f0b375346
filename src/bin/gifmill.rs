#[macro_use]
extern crate clap;

mod png;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::{App, AppSettings, Arg};
use gifmill::{ConversionRequest, FrameSource, MaxSize, Operation, WorkQueue};
use imgref::ImgVec;
use pbr::ProgressBar;

use crate::png::Lodecoder;

type BinResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

fn main() {
    if let Err(e) = bin_main() {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn bin_main() -> BinResult<()> {
    let matches = App::new(crate_name!())
        .version(crate_version!())
        .about("Samples PNG animation frames into an animated GIF")
        .setting(AppSettings::UnifiedHelpMessage)
        .setting(AppSettings::DeriveDisplayOrder)
        .setting(AppSettings::ArgRequiredElseHelp)
        .arg(Arg::with_name("output")
            .long("output")
            .short("o")
            .help("Destination file to write to")
            .empty_values(false)
            .takes_value(true)
            .value_name("a.gif")
            .required(true))
        .arg(Arg::with_name("fps")
            .long("fps")
            .help("Sampling rate of the output GIF, frames per second")
            .empty_values(false)
            .value_name("num")
            .default_value("10"))
        .arg(Arg::with_name("in-fps")
            .long("in-fps")
            .help("Presentation rate of the input PNG frames")
            .empty_values(false)
            .value_name("num")
            .default_value("20"))
        .arg(Arg::with_name("start")
            .long("start")
            .help("Convert from this time, in seconds from the start")
            .takes_value(true)
            .value_name("sec"))
        .arg(Arg::with_name("end")
            .long("end")
            .help("Convert up to this time, in seconds from the start")
            .takes_value(true)
            .value_name("sec"))
        .arg(Arg::with_name("width")
            .long("width")
            .short("W")
            .takes_value(true)
            .value_name("px")
            .default_value("480")
            .help("Maximum width"))
        .arg(Arg::with_name("height")
            .long("height")
            .short("H")
            .takes_value(true)
            .value_name("px")
            .default_value("480")
            .help("Maximum height"))
        .arg(Arg::with_name("overlay")
            .long("overlay")
            .takes_value(true)
            .value_name("file.png")
            .help("PNG composited over every frame, anchored top-left"))
        .arg(Arg::with_name("once")
            .long("once")
            .help("Do not loop the GIF"))
        .arg(Arg::with_name("quiet")
            .long("quiet")
            .help("Do not show a progress bar"))
        .arg(Arg::with_name("FRAMES")
            .help("PNG animation frames")
            .min_values(1)
            .empty_values(false)
            .use_delimiter(false)
            .required(true))
        .get_matches_from(wild::args_os());

    let frames: Vec<PathBuf> = matches
        .values_of_os("FRAMES")
        .ok_or("missing frames")?
        .map(PathBuf::from)
        .collect();
    let output = PathBuf::from(matches.value_of_os("output").ok_or("missing output")?);

    let fps: f64 = parse(matches.value_of("fps"), "fps")?.ok_or("missing fps")?;
    let in_fps: f64 = parse(matches.value_of("in-fps"), "in-fps")?.ok_or("missing in-fps")?;
    if !(in_fps > 0.0) {
        return Err("in-fps must be positive".into());
    }
    let mut request = ConversionRequest::new(fps, MaxSize {
        width: parse(matches.value_of("width"), "width")?.ok_or("missing width")?,
        height: parse(matches.value_of("height"), "height")?.ok_or("missing height")?,
    });
    request.start = parse(matches.value_of("start"), "start")?;
    request.end = parse(matches.value_of("end"), "end")?;
    request.once = matches.is_present("once");
    if let Some(path) = matches.value_of_os("overlay") {
        request.overlay = Some(load_overlay(Path::new(path))?);
    }

    let source = Lodecoder::new(frames, in_fps);
    let quiet = matches.is_present("quiet");
    let expected = expected_frames(&request, source.duration());

    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    let mut operation = Operation::new(request, Arc::new(source), &output)?
        .on_complete(move |result| {
            done_tx.send(result).ok();
        });

    let progress = if quiet {
        None
    } else {
        let mut pb = ProgressBar::new(expected);
        pb.show_speed = false;
        pb.show_percent = false;
        pb.format(" #_. ");
        pb.message("Frame ");
        pb.set_max_refresh_rate(Some(Duration::from_millis(250)));
        let pb = Arc::new(Mutex::new(pb));
        let for_preview = Arc::clone(&pb);
        operation = operation.on_preview(move |_frame, _pts| {
            for_preview.lock().unwrap().inc();
        });
        Some(pb)
    };

    let queue = WorkQueue::new(1);
    queue.submit(operation)?;

    let artifact = done_rx.recv()??;
    let shown = dunce::canonicalize(&artifact.path).unwrap_or(artifact.path);
    match progress {
        Some(pb) => pb.lock().unwrap().finish_print(&format!("gifmill created {}", shown.display())),
        None => println!("gifmill created {}", shown.display()),
    }
    Ok(())
}

fn parse<T: std::str::FromStr>(value: Option<&str>, what: &str) -> BinResult<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match value {
        Some(s) => Ok(Some(s.parse().map_err(|e| format!("invalid {}: {}", what, e))?)),
        None => Ok(None),
    }
}

fn load_overlay(path: &Path) -> BinResult<ImgVec<rgb::RGBA8>> {
    let image = lodepng::decode32_file(path)
        .map_err(|e| format!("can't load overlay {}: {}", path.display(), e))?;
    Ok(ImgVec::new(image.buffer, image.width, image.height))
}

/// How many frames the conversion will sample; drives the progress bar.
fn expected_frames(request: &ConversionRequest, duration: f64) -> u64 {
    let start = request.start.unwrap_or(0.0);
    let end = request.end.unwrap_or(duration).min(duration);
    if end <= start {
        return 0;
    }
    ((end - start) * request.fps).ceil() as u64
}
