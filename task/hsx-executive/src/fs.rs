// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The sandboxed `FS` SVC family: file operations rooted in a
//! host-controlled directory (spec §4.4).

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FsError {
    InvalidPath,
    NotFound,
    TooManyOpen,
    BadFd,
    Io,
}

fn sanitize(root: &Path, raw: &str) -> Result<PathBuf, FsError> {
    let rel = Path::new(raw);
    if rel.is_absolute() {
        return Err(FsError::InvalidPath);
    }
    for comp in rel.components() {
        match comp {
            Component::Normal(_) => {}
            _ => return Err(FsError::InvalidPath),
        }
    }
    Ok(root.join(rel))
}

const MAX_OPEN_FILES: usize = 64;

pub struct FsHost {
    root: PathBuf,
    open: HashMap<u32, File>,
    next_fd: u32,
}

impl FsHost {
    pub fn new(root: PathBuf) -> Self {
        Self { root, open: HashMap::new(), next_fd: 1 }
    }

    pub fn open(&mut self, path: &str, write: bool) -> Result<u32, FsError> {
        if self.open.len() >= MAX_OPEN_FILES {
            return Err(FsError::TooManyOpen);
        }
        let full = sanitize(&self.root, path)?;
        let file = if write {
            fs::OpenOptions::new().create(true).write(true).truncate(false).open(&full)
        } else {
            File::open(&full)
        }
        .map_err(|_| FsError::NotFound)?;
        let fd = self.next_fd;
        self.next_fd += 1;
        self.open.insert(fd, file);
        Ok(fd)
    }

    pub fn read(&mut self, fd: u32, buf: &mut [u8]) -> Result<usize, FsError> {
        let file = self.open.get_mut(&fd).ok_or(FsError::BadFd)?;
        file.read(buf).map_err(|_| FsError::Io)
    }

    pub fn write(&mut self, fd: u32, data: &[u8]) -> Result<usize, FsError> {
        let file = self.open.get_mut(&fd).ok_or(FsError::BadFd)?;
        file.write(data).map_err(|_| FsError::Io)
    }

    pub fn seek_start(&mut self, fd: u32) -> Result<(), FsError> {
        let file = self.open.get_mut(&fd).ok_or(FsError::BadFd)?;
        file.seek(SeekFrom::Start(0)).map(|_| ()).map_err(|_| FsError::Io)
    }

    pub fn close(&mut self, fd: u32) -> Result<(), FsError> {
        self.open.remove(&fd).map(|_| ()).ok_or(FsError::BadFd)
    }

    pub fn listdir(&self, path: &str) -> Result<Vec<String>, FsError> {
        let full = sanitize(&self.root, path)?;
        let rd = fs::read_dir(&full).map_err(|_| FsError::NotFound)?;
        let mut names = Vec::new();
        for entry in rd {
            let entry = entry.map_err(|_| FsError::Io)?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    pub fn delete(&self, path: &str) -> Result<(), FsError> {
        let full = sanitize(&self.root, path)?;
        fs::remove_file(&full).map_err(|_| FsError::NotFound)
    }

    pub fn rename(&self, from: &str, to: &str) -> Result<(), FsError> {
        let src = sanitize(&self.root, from)?;
        let dst = sanitize(&self.root, to)?;
        fs::rename(src, dst).map_err(|_| FsError::NotFound)
    }

    pub fn mkdir(&self, path: &str) -> Result<(), FsError> {
        let full = sanitize(&self.root, path)?;
        fs::create_dir_all(full).map_err(|_| FsError::Io)
    }
}
