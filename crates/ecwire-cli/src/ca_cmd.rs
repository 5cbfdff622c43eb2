//! `ecwire ca` -- generate a self-signed root CA.
//!
//! Standalone helper; the channel itself never consults certificates.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ecwire_crypto::certs::{self, CaSubject};

/// Certificate filename.
pub const CERT_FILENAME: &str = "ca_cert.pem";
/// Private key filename.
pub const KEY_FILENAME: &str = "ca_private_key.pem";

/// Arguments for the `ca` subcommand.
#[derive(clap::Args, Debug)]
pub struct CaArgs {
    /// Directory to write the certificate and key into
    #[arg(long, default_value = ".")]
    pub out_dir: PathBuf,

    /// Certificate lifetime in days
    #[arg(long, default_value_t = certs::DEFAULT_VALIDITY_DAYS)]
    pub days: u32,

    /// Subject common name
    #[arg(long)]
    pub common_name: Option<String>,

    /// Subject organization
    #[arg(long)]
    pub organization: Option<String>,

    /// Replace existing files
    #[arg(long)]
    pub force: bool,
}

/// Paths written by [`write_ca`].
#[derive(Debug)]
pub struct WrittenCa {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Execute the `ca` subcommand.
#[allow(clippy::print_stdout)]
pub fn run(args: &CaArgs) -> Result<()> {
    let mut subject = CaSubject::default();
    if let Some(cn) = &args.common_name {
        subject.common_name.clone_from(cn);
    }
    if let Some(org) = &args.organization {
        subject.organization.clone_from(org);
    }

    let written = write_ca(&args.out_dir, &subject, args.days, args.force)?;

    println!("Root CA created: {}", subject.common_name);
    println!("  Certificate: {}", written.cert.display());
    println!("  Private key: {}", written.key.display());
    println!("  Valid for:   {} days", args.days);
    Ok(())
}

/// Generate a CA and write its PEM files into `out_dir`.
pub fn write_ca(out_dir: &Path, subject: &CaSubject, days: u32, force: bool) -> Result<WrittenCa> {
    if days == 0 {
        anyhow::bail!("--days must be at least 1");
    }
    let cert = out_dir.join(CERT_FILENAME);
    let key = out_dir.join(KEY_FILENAME);
    if !force {
        for path in [&cert, &key] {
            if path.exists() {
                anyhow::bail!(
                    "{} already exists. Pass --force to replace it.",
                    path.display()
                );
            }
        }
    }

    fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;

    let bundle = certs::create_ca(subject, days)
        .map_err(|e| anyhow::anyhow!("CA generation failed: {e}"))?;

    fs::write(&cert, &bundle.cert_pem).context("Failed to write CA certificate")?;
    fs::write(&key, &bundle.key_pem).context("Failed to write CA private key")?;

    // Restrict key file permissions on unix
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = fs::Permissions::from_mode(0o600);
        fs::set_permissions(&key, perms).context("Failed to set key file permissions")?;
    }

    tracing::info!(cert = %cert.display(), "root CA written");
    Ok(WrittenCa { cert, key })
}
