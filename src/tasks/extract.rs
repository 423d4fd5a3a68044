use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

use crate::task::{Cancelled, Task, TaskContext, TaskOutput};

/// Archive formats builds are published in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    Tar,
    TarGz,
    TarXz,
}

impl ArchiveKind {
    /// Recognize the format from the file name
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_lowercase();
        if name.ends_with(".zip") {
            Some(Self::Zip)
        } else if name.ends_with(".tar.xz") || name.ends_with(".txz") {
            Some(Self::TarXz)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if name.ends_with(".tar") {
            Some(Self::Tar)
        } else {
            None
        }
    }
}

/// Unpack a downloaded build archive into a branch folder
///
/// Finishes with the path of the archive's top-level folder inside
/// `destination`.
pub struct ExtractTask {
    file: PathBuf,
    destination: PathBuf,
}

impl ExtractTask {
    pub fn new(file: PathBuf, destination: PathBuf) -> Self {
        Self { file, destination }
    }
}

#[async_trait]
impl Task for ExtractTask {
    fn describe(&self) -> String {
        format!("Extract {:?} to {:?}", self.file, self.destination)
    }

    async fn run(&self, ctx: &TaskContext) -> Result<TaskOutput> {
        ctx.progress(0, 0);
        let kind = ArchiveKind::from_path(&self.file)
            .ok_or_else(|| anyhow!("Unsupported archive format: {:?}", self.file))?;

        let _source = ctx.locks().read(&self.file).await;
        let _destination = ctx.locks().write(&self.destination).await;
        tokio::fs::create_dir_all(&self.destination)
            .await
            .with_context(|| format!("Failed to create {:?}", self.destination))?;

        let file = self.file.clone();
        let destination = self.destination.clone();
        let reporter = ctx.clone();
        let folder = tokio::task::spawn_blocking(move || {
            extract(
                &file,
                &destination,
                kind,
                &|current, total| reporter.progress(current, total),
                &|| reporter.is_cancelled(),
            )
        })
        .await??;

        info!("📦 Extracted {:?} to {:?}", self.file, folder);
        Ok(TaskOutput::Path(folder))
    }
}

/// Unpack `source` into `destination`, returning the top-level folder
///
/// `report` gets `(0, total)` once the uncompressed size is known and then
/// the running byte count after every entry. `cancelled` is checked between
/// entries.
pub fn extract(
    source: &Path,
    destination: &Path,
    kind: ArchiveKind,
    report: &dyn Fn(u64, u64),
    cancelled: &dyn Fn() -> bool,
) -> Result<PathBuf> {
    let folder = match kind {
        ArchiveKind::Zip => extract_zip(source, destination, report, cancelled)?,
        _ => extract_tar(source, destination, kind, report, cancelled)?,
    };
    Ok(destination.join(folder))
}

/// First normal component of an entry path
fn top_folder(path: &Path) -> Option<PathBuf> {
    path.components().find_map(|c| match c {
        Component::Normal(name) => Some(PathBuf::from(name)),
        _ => None,
    })
}

fn extract_zip(
    source: &Path,
    destination: &Path,
    report: &dyn Fn(u64, u64),
    cancelled: &dyn Fn() -> bool,
) -> Result<PathBuf> {
    let file = File::open(source).with_context(|| format!("Failed to open {:?}", source))?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file))
        .with_context(|| format!("{:?} is not a valid zip archive", source))?;

    let mut folder = None;
    let mut total = 0;
    for i in 0..archive.len() {
        let entry = archive.by_index(i)?;
        if folder.is_none() {
            folder = entry.enclosed_name().and_then(top_folder);
        }
        total += entry.size();
    }
    let folder = folder.ok_or_else(|| anyhow!("{:?} contains nothing to extract", source))?;
    report(0, total);

    let mut extracted = 0;
    for i in 0..archive.len() {
        if cancelled() {
            bail!(Cancelled);
        }
        let mut entry = archive.by_index(i)?;
        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            warn!("Skipping unsafe entry {:?} in {:?}", entry.name(), source);
            continue;
        };
        let target = destination.join(&relative);

        if entry.is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("Failed to create {:?}", target))?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out =
                File::create(&target).with_context(|| format!("Failed to create {:?}", target))?;
            io::copy(&mut entry, &mut out)
                .with_context(|| format!("Failed to extract {:?}", relative))?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Some(mode) = entry.unix_mode() {
                    fs::set_permissions(&target, fs::Permissions::from_mode(mode & 0o777))?;
                }
            }
        }

        extracted += entry.size();
        report(extracted, total);
    }

    debug!("Extracted {} zip entries from {:?}", archive.len(), source);
    Ok(folder)
}

fn open_tar(source: &Path, kind: ArchiveKind) -> Result<tar::Archive<Box<dyn Read>>> {
    let file = BufReader::new(
        File::open(source).with_context(|| format!("Failed to open {:?}", source))?,
    );
    let reader: Box<dyn Read> = match kind {
        ArchiveKind::TarGz => Box::new(flate2::read::GzDecoder::new(file)),
        ArchiveKind::TarXz => Box::new(xz2::read::XzDecoder::new(file)),
        _ => Box::new(file),
    };
    Ok(tar::Archive::new(reader))
}

fn extract_tar(
    source: &Path,
    destination: &Path,
    kind: ArchiveKind,
    report: &dyn Fn(u64, u64),
    cancelled: &dyn Fn() -> bool,
) -> Result<PathBuf> {
    // A compressed stream only reads front to back, so sizes take a pass of their own
    let mut folder = None;
    let mut total = 0;
    let mut archive = open_tar(source, kind)?;
    for entry in archive.entries()? {
        if cancelled() {
            bail!(Cancelled);
        }
        let entry = entry.with_context(|| format!("{:?} is not a valid tar archive", source))?;
        if folder.is_none() {
            folder = top_folder(&entry.path()?);
        }
        total += entry.header().size()?;
    }
    let folder = folder.ok_or_else(|| anyhow!("{:?} contains nothing to extract", source))?;
    report(0, total);

    let mut extracted = 0;
    let mut archive = open_tar(source, kind)?;
    for entry in archive.entries()? {
        if cancelled() {
            bail!(Cancelled);
        }
        let mut entry = entry?;
        let size = entry.header().size()?;
        // unpack_in refuses paths that would land outside `destination`
        if !entry.unpack_in(destination)? {
            warn!("Skipping unsafe entry {:?} in {:?}", entry.path()?, source);
        }
        extracted += size;
        report(extracted, total);
    }

    Ok(folder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskEventKind;
    use std::io::Write;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    fn write_zip(path: &Path) {
        let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
        let options =
            zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Deflated);
        zip.add_directory("blender-4.1.0-windows-x64/", options).unwrap();
        zip.start_file("blender-4.1.0-windows-x64/blender.exe", options)
            .unwrap();
        zip.write_all(&[1u8; 300]).unwrap();
        zip.start_file("blender-4.1.0-windows-x64/4.1/config/startup.blend", options)
            .unwrap();
        zip.write_all(&[2u8; 200]).unwrap();
        zip.finish().unwrap();
    }

    fn append_file<W: Write>(builder: &mut tar::Builder<W>, path: &str, data: &[u8]) {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder.append_data(&mut header, path, data).unwrap();
    }

    fn write_tar_xz(path: &Path) {
        let encoder = xz2::write::XzEncoder::new(File::create(path).unwrap(), 6);
        let mut builder = tar::Builder::new(encoder);
        append_file(&mut builder, "blender-4.1.0-linux-x64/blender", &[1u8; 400]);
        append_file(&mut builder, "blender-4.1.0-linux-x64/4.1/datafiles/icons", &[2u8; 100]);
        builder.into_inner().unwrap().finish().unwrap();
    }

    fn write_tar_gz(path: &Path) {
        let encoder =
            flate2::write::GzEncoder::new(File::create(path).unwrap(), flate2::Compression::fast());
        let mut builder = tar::Builder::new(encoder);
        append_file(&mut builder, "./bforartists-4.0/bforartists", &[3u8; 50]);
        builder.into_inner().unwrap().finish().unwrap();
    }

    fn progress(kinds: &[TaskEventKind]) -> Vec<(u64, u64)> {
        kinds
            .iter()
            .filter_map(|k| match k {
                TaskEventKind::Progress { current, total } => Some((*current, *total)),
                _ => None,
            })
            .collect()
    }

    async fn run_extract(task: &ExtractTask) -> (Result<TaskOutput>, Vec<TaskEventKind>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = TaskContext::detached(tx);
        let output = task.run(&ctx).await;
        drop(ctx);
        let mut kinds = Vec::new();
        while let Some(event) = rx.recv().await {
            kinds.push(event.kind);
        }
        (output, kinds)
    }

    #[tokio::test]
    async fn test_zip_extracts_into_branch_folder() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join(".temp/blender-4.1.0-windows-x64.zip");
        fs::create_dir_all(archive.parent().unwrap()).unwrap();
        write_zip(&archive);
        let stable = temp_dir.path().join("stable");

        let task = ExtractTask::new(archive.clone(), stable.clone());
        let (output, kinds) = run_extract(&task).await;

        let folder = stable.join("blender-4.1.0-windows-x64");
        assert_eq!(output.unwrap(), TaskOutput::Path(folder.clone()));
        assert_eq!(fs::read(folder.join("blender.exe")).unwrap().len(), 300);
        assert!(folder.join("4.1/config/startup.blend").is_file());

        let progress = progress(&kinds);
        assert_eq!(progress.first(), Some(&(0, 0)));
        assert_eq!(progress[1], (0, 500));
        assert_eq!(progress.last(), Some(&(500, 500)));
    }

    #[tokio::test]
    async fn test_tar_xz_extracts_with_permissions() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("blender-4.1.0-linux-x64.tar.xz");
        write_tar_xz(&archive);
        let daily = temp_dir.path().join("daily");

        let task = ExtractTask::new(archive, daily.clone());
        let (output, kinds) = run_extract(&task).await;

        let folder = daily.join("blender-4.1.0-linux-x64");
        assert_eq!(output.unwrap(), TaskOutput::Path(folder.clone()));
        assert!(folder.join("4.1/datafiles/icons").is_file());
        assert_eq!(progress(&kinds).last(), Some(&(500, 500)));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(folder.join("blender")).unwrap().permissions().mode();
            assert_ne!(mode & 0o111, 0);
        }
    }

    #[tokio::test]
    async fn test_tar_gz_top_folder_skips_leading_dot() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("bforartists-4.0.tgz");
        write_tar_gz(&archive);

        let task = ExtractTask::new(archive, temp_dir.path().join("fork"));
        let (output, _) = run_extract(&task).await;
        let folder = temp_dir.path().join("fork/bforartists-4.0");
        assert_eq!(output.unwrap(), TaskOutput::Path(folder.clone()));
        assert!(folder.join("bforartists").is_file());
    }

    #[tokio::test]
    async fn test_unknown_format_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("blender-4.1.0-macos-arm64.dmg");
        fs::write(&archive, "not an archive").unwrap();

        let task = ExtractTask::new(archive, temp_dir.path().join("stable"));
        let (output, _) = run_extract(&task).await;
        assert!(output.unwrap_err().to_string().contains("Unsupported archive"));
    }

    #[test]
    fn test_cancelled_extraction_stops_between_entries() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("build.zip");
        write_zip(&archive);

        let err = extract(
            &archive,
            &temp_dir.path().join("stable"),
            ArchiveKind::Zip,
            &|_, _| {},
            &|| true,
        )
        .unwrap_err();
        assert!(err.is::<Cancelled>());
        assert!(!temp_dir.path().join("stable/blender-4.1.0-windows-x64/blender.exe").exists());
    }

    #[test]
    fn test_archive_kind_from_file_name() {
        assert_eq!(ArchiveKind::from_path(Path::new("a/b.ZIP")), Some(ArchiveKind::Zip));
        assert_eq!(ArchiveKind::from_path(Path::new("b.tar.xz")), Some(ArchiveKind::TarXz));
        assert_eq!(ArchiveKind::from_path(Path::new("b.tgz")), Some(ArchiveKind::TarGz));
        assert_eq!(ArchiveKind::from_path(Path::new("b.tar")), Some(ArchiveKind::Tar));
        assert_eq!(ArchiveKind::from_path(Path::new("b.dmg")), None);
    }
}
