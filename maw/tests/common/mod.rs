use flate2::Compression;
use flate2::write::GzEncoder;
use maw::pacman::manager::{PackageManager, PackageManagerError};
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tar::{Builder, EntryType, Header};

/// Writes an executable shell script.
pub fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Gzipped source bundle holding `<name>/PKGBUILD`, plus `<name>/FAIL` when the build must fail.
pub fn source_bundle(name: &str, failing: bool) -> Vec<u8> {
    let mut builder = Builder::new(GzEncoder::new(Vec::new(), Compression::default()));

    let mut header = Header::new_ustar();
    header.set_entry_type(EntryType::Directory);
    header.set_mode(0o755);
    header.set_size(0);
    builder
        .append_data(&mut header, format!("{name}/"), io::empty())
        .unwrap();

    let mut files = vec![("PKGBUILD", format!("pkgname={name}\n"))];
    if failing {
        files.push(("FAIL", String::new()));
    }
    for (file, content) in files {
        let mut header = Header::new_ustar();
        header.set_entry_type(EntryType::Regular);
        header.set_mode(0o644);
        header.set_size(content.len() as u64);
        builder
            .append_data(&mut header, format!("{name}/{file}"), content.as_bytes())
            .unwrap();
    }

    builder.into_inner().unwrap().finish().unwrap()
}

/// Build tool double producing `<pkgname>-1-1-any.pkg.tar.zst` from the PKGBUILD in the current
/// directory, failing when a `FAIL` file sits next to it.
pub fn fake_makepkg(dir: &Path) -> PathBuf {
    script(
        dir,
        "makepkg",
        r#". ./PKGBUILD
if [ "$1" = "--packagelist" ]; then
    echo "$PKGDEST/$pkgname-1-1-any.pkg.tar.zst"
    exit 0
fi
[ -f FAIL ] && exit 4
touch "$PKGDEST/$pkgname-1-1-any.pkg.tar.zst""#,
    )
}

/// Package manager double keeping every install it was asked for.
#[derive(Default)]
pub struct RecordingPackageManager {
    pub installs: Mutex<Vec<(Vec<PathBuf>, bool)>>,
    /// Installs including this artifact fail.
    pub failing: Option<PathBuf>,
}

impl PackageManager for RecordingPackageManager {
    fn install(&self, artifacts: &[PathBuf], as_deps: bool) -> Result<(), PackageManagerError> {
        self.installs
            .lock()
            .unwrap()
            .push((artifacts.to_vec(), as_deps));
        match &self.failing {
            Some(failing) if artifacts.contains(failing) => Err(PackageManagerError::Failed(1)),
            _ => Ok(()),
        }
    }

    fn remove(&self, _names: &[String]) -> Result<(), PackageManagerError> {
        Ok(())
    }
}
