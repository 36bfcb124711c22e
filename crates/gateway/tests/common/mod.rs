//! Shared fixtures: stub agent scripts and CSRs

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use certomat::issuance::{CsrOrchestrator, IssuanceAgent, SerializationToken};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use tempfile::TempDir;

pub const STUB_CERT: &str = "-----BEGIN CERTIFICATE-----\nc3R1Yg==\n-----END CERTIFICATE-----\n";

/// Stub agent: rejects overlapping runs, writes `STUB_CERT` on certonly
pub const SUCCESS_AGENT: &str = r#"
[ "$1" = "certonly" ] || exit 0
if [ -e busy ]; then echo "overlapping agent run" >&2; exit 9; fi
touch busy
while [ $# -gt 0 ]; do
  case "$1" in
    --csr) cp "$2" last-csr.req; shift ;;
    -d) echo "$2" > last-name.txt; shift ;;
  esac
  shift
done
sleep 0.2
printf -- '-----BEGIN CERTIFICATE-----\nc3R1Yg==\n-----END CERTIFICATE-----\n' > 0000_cert.pem
printf 'chain' > 0000_chain.pem
rm busy
"#;

pub const FAILING_AGENT: &str = r#"
echo "Saving debug log" 
echo "Challenge failed for domain host.example.org" >&2
exit 1
"#;

/// Stub agent that takes a while, then marks completion
pub const SLOW_AGENT: &str = r#"
[ "$1" = "certonly" ] || exit 0
sleep 1
printf -- '-----BEGIN CERTIFICATE-----\nc3R1Yg==\n-----END CERTIFICATE-----\n' > 0000_cert.pem
touch finished
"#;

pub const SILENT_AGENT: &str = "exit 0";

pub const HANGING_AGENT: &str = "exec sleep 30";

/// Temp dirs kept alive for the duration of a test
pub struct Fixture {
    pub bin: TempDir,
    pub state: TempDir,
    pub staging: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            bin: TempDir::new().unwrap(),
            state: TempDir::new().unwrap(),
            staging: TempDir::new().unwrap(),
        }
    }

    pub fn agent(&self, body: &str) -> IssuanceAgent {
        IssuanceAgent::new(write_script(self.bin.path(), body), self.state.path(), "certomat.example.org")
            .with_timeout(Duration::from_secs(10))
    }

    pub fn orchestrator(&self, body: &str, token: SerializationToken) -> CsrOrchestrator {
        CsrOrchestrator::new(self.agent(body), token).with_staging_dir(self.staging.path())
    }

    pub fn staged_files(&self) -> usize {
        std::fs::read_dir(self.staging.path()).unwrap().count()
    }

    pub fn result_files(&self) -> Vec<String> {
        std::fs::read_dir(self.state.path())
            .unwrap()
            .filter_map(|e| e.ok()?.file_name().into_string().ok())
            .filter(|name| name.starts_with("00") && name.ends_with(".pem"))
            .collect()
    }
}

pub fn write_script(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("agent");
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// DER CSR with the given subject common name
pub fn csr_der(common_name: &str) -> Vec<u8> {
    let mut params = CertificateParams::new(vec![common_name.to_string()]).unwrap();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    params.distinguished_name = dn;

    let key = KeyPair::generate().unwrap();
    params.serialize_request(&key).unwrap().der().to_vec()
}
