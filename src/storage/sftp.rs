//! SFTP implementation of the remote transfer collaborator.

use super::{RemoteClient, RemoteSession};
use crate::config::RemoteConfig;
use crate::utils::errors::Result;
use ssh2::{OpenFlags, OpenType, Session, Sftp};
use std::io::Write;
use std::net::TcpStream;
use std::path::Path;
use tracing::info;

pub struct SftpClient {
    host: String,
    port: u16,
    username: String,
    password: String,
}

impl SftpClient {
    pub fn new(config: &RemoteConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            username: config.username.clone(),
            password: config.password.clone(),
        }
    }
}

impl RemoteClient for SftpClient {
    fn connect(&self) -> Result<Box<dyn RemoteSession>> {
        info!(host = %self.host, port = self.port, "connecting to SFTP server");

        let tcp = TcpStream::connect((self.host.as_str(), self.port))?;
        let mut session = Session::new()?;
        session.set_tcp_stream(tcp);
        session.handshake()?;
        session.userauth_password(&self.username, &self.password)?;

        let sftp = session.sftp()?;

        Ok(Box::new(SftpSession {
            _session: session,
            sftp,
        }))
    }
}

struct SftpSession {
    // Keeps the SSH connection alive for as long as the SFTP channel is used
    _session: Session,
    sftp: Sftp,
}

impl RemoteSession for SftpSession {
    fn create_directory(&mut self, path: &str) -> Result<()> {
        match self.sftp.mkdir(Path::new(path), 0o755) {
            Ok(()) => Ok(()),
            // Tolerate a directory left behind by an interrupted run
            Err(_) if self.sftp.stat(Path::new(path)).is_ok() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn file_exists(&mut self, path: &str) -> Result<bool> {
        Ok(self.sftp.stat(Path::new(path)).is_ok())
    }

    fn file_size(&mut self, path: &str) -> Result<u64> {
        let stat = self.sftp.stat(Path::new(path))?;
        Ok(stat.size.unwrap_or(0))
    }

    fn open_write<'a>(&'a mut self, path: &str) -> Result<Box<dyn Write + 'a>> {
        let file = self.sftp.open_mode(
            Path::new(path),
            OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
            0o644,
            OpenType::File,
        )?;
        Ok(Box::new(file))
    }

    fn open_append<'a>(&'a mut self, path: &str) -> Result<Box<dyn Write + 'a>> {
        let file = self.sftp.open_mode(
            Path::new(path),
            OpenFlags::WRITE | OpenFlags::APPEND,
            0o644,
            OpenType::File,
        )?;
        Ok(Box::new(file))
    }
}
