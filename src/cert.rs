use crate::artifact::{ArtifactKind, CertificateLayout};
use crate::domain::DomainName;
use crate::error::{Error, TrackerResult};
use crate::state::types::Inspection;
use anyhow::{Context, anyhow};
use std::fs::File;
use std::io::{BufRead, BufReader, Seek};
use std::net::IpAddr;
use std::path::Path;
use tracing::{debug, warn};
use x509_parser::extensions::{GeneralName, ParsedExtension};
use x509_parser::pem::Pem;
use x509_parser::prelude::FromDer;

/// The maximum number of certificates we will parse in a PEM-array of certificates by default
const DEFAULT_MAX_CERTIFICATE_CHAIN_LENGTH: usize = 100;

pub fn load_certificates_from_file<P: AsRef<Path>>(
    cert_file: P,
    limit: Option<usize>,
) -> anyhow::Result<Vec<ParsedX509Certificate>> {
    let cert_file = cert_file.as_ref();
    let cert_file_display = cert_file.display();
    let cert_file = File::open(cert_file).context(format!("Opening {cert_file_display} failed"))?;
    let reader = BufReader::new(cert_file);
    load_certificates_from_reader(reader, limit)
        .context(format!("Parsing certificate {cert_file_display} failed"))
}

fn load_certificates_from_reader<R: BufRead + Seek>(
    reader: R,
    limit: Option<usize>,
) -> anyhow::Result<Vec<ParsedX509Certificate>> {
    let mut certificates = Vec::new();
    for pem in
        Pem::iter_from_reader(reader).take(limit.unwrap_or(DEFAULT_MAX_CERTIFICATE_CHAIN_LENGTH))
    {
        let pem = pem.context("Reading PEM block failed")?;
        let parsed_x509 = ParsedX509Certificate::try_from(pem.contents)?;
        certificates.push(parsed_x509);
    }
    Ok(certificates)
}

/// The fields of an X.509 certificate this crate cares about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedX509Certificate {
    pub issuer: String,
    /// The issuer's organization (O=), if present
    pub issuer_organization: Option<String>,
    pub validity: Validity,
    pub subject_alternative_names: Vec<String>,
}

impl TryFrom<Vec<u8>> for ParsedX509Certificate {
    type Error = anyhow::Error;

    fn try_from(der_bytes: Vec<u8>) -> anyhow::Result<ParsedX509Certificate> {
        Self::from_der_bytes(&der_bytes)
    }
}

impl ParsedX509Certificate {
    pub fn from_der_bytes(der_bytes: &[u8]) -> anyhow::Result<ParsedX509Certificate> {
        let (_extra_bytes, cert) = x509_parser::certificate::X509Certificate::from_der(der_bytes)
            .context("Reading X.509 structure: Decoding DER failed")?;
        let issuer_organization = cert
            .issuer()
            .iter_organization()
            .find_map(|attribute| attribute.as_str().ok())
            .map(str::to_string);
        let mut subject_alternative_names = Vec::new();
        for extension in cert.extensions() {
            if let ParsedExtension::SubjectAlternativeName(san) = extension.parsed_extension() {
                for general_name in &san.general_names {
                    match general_name {
                        GeneralName::DNSName(dns_name) => {
                            subject_alternative_names.push((*dns_name).to_string());
                        }
                        GeneralName::IPAddress(ip_addr) => match parse_ip_address(ip_addr) {
                            Some(ip_addr) => subject_alternative_names.push(ip_addr.to_string()),
                            None => warn!("Certificate contains invalid IP address {ip_addr:?}"),
                        },
                        unsupported => {
                            debug!("Ignoring general name {unsupported} in certificate");
                        }
                    }
                }
            }
        }
        Ok(Self {
            issuer: cert.issuer.to_string(),
            issuer_organization,
            validity: (&cert.validity).into(),
            subject_alternative_names,
        })
    }

    /// Issuer organization, falling back to the full issuer DN
    pub fn issuer_name(&self) -> String {
        self.issuer_organization
            .clone()
            .unwrap_or_else(|| self.issuer.clone())
    }
}

fn parse_ip_address(raw: &[u8]) -> Option<IpAddr> {
    <[u8; 16]>::try_from(raw)
        .ok()
        .map(IpAddr::from)
        .or_else(|| <[u8; 4]>::try_from(raw).ok().map(IpAddr::from))
}

impl From<&ParsedX509Certificate> for Inspection {
    fn from(cert: &ParsedX509Certificate) -> Self {
        Inspection {
            expires_at: cert.validity.not_after,
            issuer: Some(cert.issuer_name()),
            subject_names: cert.subject_alternative_names.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Validity {
    pub not_before: time::OffsetDateTime,
    pub not_after: time::OffsetDateTime,
}

impl From<&x509_parser::certificate::Validity> for Validity {
    fn from(value: &x509_parser::certificate::Validity) -> Self {
        Self {
            not_before: value.not_before.to_datetime(),
            not_after: value.not_after.to_datetime(),
        }
    }
}

/// Reads a domain's issued certificate from disk
#[derive(Debug, Clone)]
pub struct CertificateInspector {
    layout: CertificateLayout,
}

impl CertificateInspector {
    pub fn new(layout: CertificateLayout) -> Self {
        Self { layout }
    }

    /// Expiry, issuer and names of the leaf certificate the ACME client stored for `domain`
    pub async fn inspect(&self, domain: &DomainName) -> TrackerResult<Inspection> {
        let Some(path) = self.layout.locate(domain, ArtifactKind::Cert) else {
            return Err(Error::MissingCertificate {
                domain: domain.clone(),
                path: self.layout.expected_path(domain, ArtifactKind::Cert),
            });
        };
        debug!("Inspecting certificate {}", path.display());
        let certificates = tokio::task::spawn_blocking(move || {
            load_certificates_from_file(&path, Some(1))
        })
        .await
        .context("Certificate parser task failed")??;
        let leaf = certificates
            .first()
            .ok_or_else(|| anyhow!("The certificate file of {domain} contains no certificate"))?;
        Ok(leaf.into())
    }
}
