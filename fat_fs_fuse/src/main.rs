mod block_file;
mod logging;

use block_file::{BlockFile, ImageStore};
use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use fat_fs::config::FS_FILENAME_LEN;
use fat_fs::{volume, BlockDevice, FatFileSystem, FsError};
use log::{info, warn};
use std::error::Error;
use std::fs::{read_dir, File};
use std::io::{self, Read, Write};
use std::path::Path;
use std::process;
use std::sync::Arc;

type CliResult<T> = Result<T, Box<dyn Error>>;

fn main() {
    logging::init();
    if let Err(err) = run(&app().get_matches()) {
        eprintln!("error: {}", err);
        process::exit(1);
    }
}

fn app() -> App<'static, 'static> {
    let name_arg = Arg::with_name("name")
        .required(true)
        .help("File name inside the volume");
    App::new("fat_fs_fuse")
        .about("Builds and inspects ECS150FS disk images")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("image")
                .short("i")
                .long("image")
                .takes_value(true)
                .required(true)
                .help("Disk image path"),
        )
        .subcommand(
            SubCommand::with_name("format")
                .about("Create the image and lay out an empty volume")
                .arg(
                    Arg::with_name("blocks")
                        .short("b")
                        .long("blocks")
                        .takes_value(true)
                        .default_value("8198")
                        .help("Total blocks, superblock and tables included"),
                ),
        )
        .subcommand(SubCommand::with_name("info").about("Print volume geometry and usage"))
        .subcommand(SubCommand::with_name("ls").about("List files"))
        .subcommand(
            SubCommand::with_name("add")
                .about("Copy a host file into the volume")
                .arg(Arg::with_name("file").required(true).help("Host file"))
                .arg(
                    Arg::with_name("name")
                        .short("n")
                        .long("name")
                        .takes_value(true)
                        .help("Name inside the volume, defaults to the host file name"),
                ),
        )
        .subcommand(
            SubCommand::with_name("cat")
                .about("Write a file's contents to stdout")
                .arg(name_arg.clone()),
        )
        .subcommand(
            SubCommand::with_name("rm")
                .about("Delete a file")
                .arg(name_arg.clone()),
        )
        .subcommand(
            SubCommand::with_name("stat")
                .about("Print a file's size")
                .arg(name_arg),
        )
        .subcommand(
            SubCommand::with_name("pack")
                .about("Add every regular file of a host directory")
                .arg(
                    Arg::with_name("source")
                        .short("s")
                        .long("source")
                        .takes_value(true)
                        .required(true)
                        .help("Host source directory"),
                ),
        )
}

fn run(matches: &ArgMatches) -> CliResult<()> {
    let image = matches.value_of("image").ok_or("missing image path")?;
    match matches.subcommand() {
        ("format", Some(sub)) => {
            let blocks = sub
                .value_of("blocks")
                .ok_or("missing block count")?
                .parse::<usize>()?;
            format(image, blocks)
        }
        ("info", _) => mounted(image, || {
            println!("{}", volume::info()?);
            Ok(())
        }),
        ("ls", _) => mounted(image, || {
            println!("FS Ls:");
            for file in volume::ls()? {
                println!("{}", file);
            }
            Ok(())
        }),
        ("add", Some(sub)) => {
            let host = Path::new(sub.value_of("file").ok_or("missing host file")?);
            let name = match sub.value_of("name") {
                Some(name) => name.to_string(),
                None => file_name(host)?,
            };
            let data = std::fs::read(host)?;
            mounted(image, || add(&name, &data))
        }
        ("cat", Some(sub)) => {
            let name = sub.value_of("name").ok_or("missing name")?;
            mounted(image, || {
                let data = with_file(name, |fd| {
                    let mut data = vec![0u8; volume::stat(fd)?];
                    let read = volume::read(fd, &mut data)?;
                    data.truncate(read);
                    Ok(data)
                })?;
                io::stdout().write_all(&data)?;
                Ok(())
            })
        }
        ("rm", Some(sub)) => {
            let name = sub.value_of("name").ok_or("missing name")?;
            mounted(image, || Ok(volume::delete(name)?))
        }
        ("stat", Some(sub)) => {
            let name = sub.value_of("name").ok_or("missing name")?;
            mounted(image, || {
                let size = with_file(name, volume::stat)?;
                println!("Size of file '{}' is {} bytes", name, size);
                Ok(())
            })
        }
        ("pack", Some(sub)) => {
            let source = sub.value_of("source").ok_or("missing source directory")?;
            pack(image, Path::new(source))
        }
        _ => Err("no command given".into()),
    }
}

fn format(image: &str, blocks: usize) -> CliResult<()> {
    let device: Arc<dyn BlockDevice> = Arc::new(BlockFile::create(image, blocks)?);
    let super_block = FatFileSystem::format(&device)?;
    device.close()?;
    println!(
        "formatted {}: {} blocks, {} data blocks",
        image, super_block.total_blocks, super_block.data_blocks
    );
    Ok(())
}

/// Mount `image`, run `work`, and unmount whatever `work` returned.
fn mounted<T>(image: &str, work: impl FnOnce() -> CliResult<T>) -> CliResult<T> {
    volume::mount(&ImageStore, image)?;
    let result = work();
    let unmounted = volume::unmount();
    let value = result?;
    unmounted?;
    Ok(value)
}

/// Run `work` on a fresh descriptor for `name`, closing it afterwards.
fn with_file<T>(name: &str, work: impl FnOnce(usize) -> fat_fs::Result<T>) -> fat_fs::Result<T> {
    let fd = volume::open(name)?;
    let result = work(fd);
    volume::close(fd)?;
    result
}

fn file_name(path: &Path) -> CliResult<String> {
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| format!("{} has no usable file name", path.display()))?;
    Ok(name.to_string())
}

fn add(name: &str, data: &[u8]) -> CliResult<()> {
    volume::create(name)?;
    let written = with_file(name, |fd| volume::write(fd, data))?;
    if written < data.len() {
        return Err(format!(
            "volume full: wrote {} of {} bytes to {}",
            written,
            data.len(),
            name
        )
        .into());
    }
    info!("added {} ({} bytes)", name, written);
    Ok(())
}

fn pack(image: &str, source: &Path) -> CliResult<()> {
    let mut files = Vec::new();
    for dir_entry in read_dir(source)? {
        let path = dir_entry?.path();
        if !path.is_file() {
            continue;
        }
        let name = file_name(&path)?;
        if name.len() >= FS_FILENAME_LEN {
            warn!("skipping {}: name too long", path.display());
            continue;
        }
        files.push((name, path));
    }
    files.sort();
    println!("Found {} files to pack", files.len());

    mounted(image, || {
        for (name, path) in &files {
            let mut data = Vec::new();
            File::open(path)?.read_to_end(&mut data)?;
            if add_new(name, &data)? {
                println!("Processing file: {}, size: {} bytes", name, data.len());
            } else {
                warn!("skipping {}: already in the volume", name);
            }
        }
        Ok(())
    })
}

/// Like [`add`], but a file already in the volume is left alone and
/// reported as `false`.
fn add_new(name: &str, data: &[u8]) -> CliResult<bool> {
    match add(name, data) {
        Ok(()) => Ok(true),
        Err(err) if is_already_exists(err.as_ref()) => Ok(false),
        Err(err) => Err(err),
    }
}

fn is_already_exists(err: &(dyn Error + 'static)) -> bool {
    matches!(err.downcast_ref::<FsError>(), Some(FsError::AlreadyExists))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    // the mount slot is process-wide, so the whole flow runs in one test
    #[test]
    fn commands_end_to_end() {
        let dir = tempdir().unwrap();
        let image = dir.path().join("disk.fs");
        let image = image.to_str().unwrap();
        let source = dir.path().join("apps");
        std::fs::create_dir(&source).unwrap();
        std::fs::write(source.join("init"), b"#!init").unwrap();
        std::fs::write(source.join("shell"), vec![b's'; 9000]).unwrap();
        std::fs::write(source.join("a-very-long-file-name"), b"x").unwrap();

        let run_args = |args: &[&str]| {
            let mut argv = vec!["fat_fs_fuse", "-i", image];
            argv.extend_from_slice(args);
            run(&app().get_matches_from_safe(argv).unwrap())
        };

        run_args(&["format", "--blocks", "64"]).unwrap();
        run_args(&["pack", "--source", source.to_str().unwrap()]).unwrap();
        run_args(&["info"]).unwrap();
        run_args(&["ls"]).unwrap();
        run_args(&["stat", "shell"]).unwrap();
        run_args(&["cat", "init"]).unwrap();

        let host = source.join("init");
        run_args(&["add", host.to_str().unwrap(), "--name", "init2"]).unwrap();
        assert!(run_args(&["add", host.to_str().unwrap(), "--name", "init2"]).is_err());
        run_args(&["rm", "init"]).unwrap();
        assert!(run_args(&["rm", "init"]).is_err());
        assert!(run_args(&["cat", "nope"]).is_err());

        // packing again skips what is already there
        run_args(&["pack", "--source", source.to_str().unwrap()]).unwrap();

        volume::mount(&ImageStore, image).unwrap();
        assert!(!add_new("shell", b"other").unwrap());
        assert!(add_new("fresh", b"new").unwrap());
        volume::delete("fresh").unwrap();
        let mut names: Vec<_> = volume::ls().unwrap().into_iter().map(|f| f.name).collect();
        names.sort();
        assert_eq!(names, ["init2", "shell"]);
        let fd = volume::open("shell").unwrap();
        assert_eq!(volume::stat(fd).unwrap(), 9000);
        volume::close(fd).unwrap();
        volume::unmount().unwrap();
    }

    #[test]
    fn format_rejects_tiny_images() {
        let dir = tempdir().unwrap();
        let image = dir.path().join("tiny.fs");
        assert!(format(image.to_str().unwrap(), 3).is_err());
    }
}
