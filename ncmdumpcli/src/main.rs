use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use libncm::{dump, DumpTarget, NcmFile, ParseTargets};
use log::{error, info, LevelFilter};
use serde_json::{Map, Value};
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(
    name = "ncmdump",
    about = "A tool to dump and edit .ncm files 一个用于解密 .ncm 文件的工具"
)]
struct Opt {
    /// The .ncm files to dump 要解密的 .ncm 文件
    #[structopt(parse(from_os_str), required = true)]
    files: Vec<PathBuf>,

    /// The output directory 输出目录
    #[structopt(parse(from_os_str), short = "o", long = "output", default_value = ".")]
    output_dir: PathBuf,

    /// Dump target 解密目标 (all, audio, image, meta). Defaults to all, or to
    /// nothing when one of the edit options is given.
    #[structopt(short = "t", long = "target", possible_values = &["all", "audio", "image", "meta"])]
    target: Option<String>,

    /// Print debug logs
    #[structopt(short = "v", long = "verbose")]
    verbose: bool,

    /// Replace the overwrite object of the meta info with this JSON object
    #[structopt(long = "overwrite-meta")]
    overwrite_meta: Option<String>,

    /// Replace the album image with this file
    #[structopt(parse(from_os_str), long = "set-cover")]
    set_cover: Option<PathBuf>,

    /// Remove the album image
    #[structopt(long = "remove-cover")]
    remove_cover: bool,
}

impl Opt {
    fn edits_requested(&self) -> bool {
        self.overwrite_meta.is_some() || self.set_cover.is_some() || self.remove_cover
    }

    fn dump_target(&self) -> Option<DumpTarget> {
        match self.target.as_deref() {
            Some("audio") => Some(DumpTarget::Audio),
            Some("image") => Some(DumpTarget::Image),
            Some("meta") => Some(DumpTarget::Meta),
            Some(_) => Some(DumpTarget::All),
            None if self.edits_requested() => None,
            None => Some(DumpTarget::All),
        }
    }
}

fn main() {
    let opt = Opt::from_args();
    env_logger::Builder::new()
        .filter_level(if opt.verbose { LevelFilter::Debug } else { LevelFilter::Info })
        .init();

    if opt.set_cover.is_some() && opt.remove_cover {
        error!("--set-cover and --remove-cover can not be used together");
        process::exit(2);
    }

    let overwrite = match opt.overwrite_meta.as_deref().map(parse_overwrite).transpose() {
        Ok(overwrite) => overwrite,
        Err(e) => {
            error!("Invalid --overwrite-meta: {}", e);
            process::exit(2);
        }
    };

    let mut failed = 0;
    for file in &opt.files {
        if let Err(e) = process_file(&opt, file, overwrite.as_ref()) {
            error!("{}: {}", file.display(), e);
            failed += 1;
        }
    }
    if failed > 0 {
        error!("{} of {} file(s) failed", failed, opt.files.len());
        process::exit(1);
    }
}

fn parse_overwrite(json: &str) -> Result<Map<String, Value>, Box<dyn Error>> {
    match serde_json::from_str(json)? {
        Value::Object(map) => Ok(map),
        _ => Err("expected a JSON object".into()),
    }
}

fn process_file(opt: &Opt, file: &Path, overwrite: Option<&Map<String, Value>>) -> Result<(), Box<dyn Error>> {
    if opt.edits_requested() {
        let mut ncm = NcmFile::open_rw(file)?;
        ncm.parse(ParseTargets::META | ParseTargets::ALBUM)?;
        if let Some(overwrite) = overwrite {
            ncm.overwrite_meta(overwrite)?;
            info!("Updated meta info of {}", file.display());
        }
        if let Some(cover) = &opt.set_cover {
            let image = fs::read(cover)?;
            ncm.reset_album_image(Some(&image))?;
            info!("Replaced album image of {}", file.display());
        }
        if opt.remove_cover {
            ncm.reset_album_image(None)?;
            info!("Removed album image of {}", file.display());
        }
    }

    if let Some(target) = opt.dump_target() {
        for path in dump(file, &opt.output_dir, target)? {
            info!("{} -> {}", file.display(), path.display());
        }
    }
    Ok(())
}
