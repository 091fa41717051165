//! Artifacts: the payloads threaded between pipeline stages.

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// The kind of payload an artifact carries, in toolchain order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    /// Guppy program source text.
    Source,
    /// A serialized HUGR (the intermediate representation).
    Hugr,
    /// HUGR-dialect MLIR.
    HugrMlir,
    /// LLVM-dialect MLIR.
    LoweredMlir,
    /// LLVM IR.
    Llvm,
    /// A native object file.
    Object,
    /// A linked executable.
    Executable,
    /// Standard output captured from running the executable.
    RunOutput,
}

impl ArtifactKind {
    /// Every kind, in toolchain order.
    pub const ALL: [Self; 8] = [
        Self::Source,
        Self::Hugr,
        Self::HugrMlir,
        Self::LoweredMlir,
        Self::Llvm,
        Self::Object,
        Self::Executable,
        Self::RunOutput,
    ];

    /// Returns the stable name of the kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Hugr => "hugr",
            Self::HugrMlir => "hugr-mlir",
            Self::LoweredMlir => "lowered-mlir",
            Self::Llvm => "llvm",
            Self::Object => "object",
            Self::Executable => "executable",
            Self::RunOutput => "run-output",
        }
    }

    /// Returns true if the kind can be stored with the given encoding.
    #[must_use]
    pub fn supports(self, encoding: Encoding) -> bool {
        match self {
            Self::Source | Self::RunOutput => encoding == Encoding::Textual,
            Self::Object | Self::Executable => encoding == Encoding::Binary,
            Self::Hugr | Self::HugrMlir | Self::LoweredMlir | Self::Llvm => true,
        }
    }

    /// The encoding used when none is requested.
    #[must_use]
    pub fn default_encoding(self) -> Encoding {
        match self {
            Self::Object | Self::Executable => Encoding::Binary,
            _ => Encoding::Textual,
        }
    }

    /// The conventional file extension for this kind and encoding.
    #[must_use]
    pub fn extension(self, encoding: Encoding) -> &'static str {
        match (self, encoding) {
            (Self::Source, _) => "py",
            (Self::Hugr, Encoding::Textual) => "json",
            (Self::Hugr, Encoding::Binary) => "msgpack",
            (Self::HugrMlir | Self::LoweredMlir, Encoding::Textual) => "mlir",
            (Self::HugrMlir | Self::LoweredMlir, Encoding::Binary) => "mlirbc",
            (Self::Llvm, Encoding::Textual) => "ll",
            (Self::Llvm, Encoding::Binary) => "bc",
            (Self::Object, _) => "o",
            (Self::Executable, _) => "out",
            (Self::RunOutput, _) => "txt",
        }
    }

    /// Detects the encoding of a file of this kind from its extension.
    ///
    /// Returns `None` when the extension is missing or ambiguous.
    #[must_use]
    pub fn detect_encoding(self, path: &Path) -> Option<Encoding> {
        if !self.supports(Encoding::Textual) {
            return Some(Encoding::Binary);
        }
        if !self.supports(Encoding::Binary) {
            return Some(Encoding::Textual);
        }

        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match (self, ext.as_str()) {
            (Self::Hugr, "json") | (Self::HugrMlir | Self::LoweredMlir, "mlir") | (Self::Llvm, "ll") => {
                Some(Encoding::Textual)
            }
            (Self::Hugr, "msgpack" | "hugr")
            | (Self::HugrMlir | Self::LoweredMlir, "mlirbc")
            | (Self::Llvm, "bc") => Some(Encoding::Binary),
            _ => None,
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| {
                ConfigError::InvalidSelection(format!(
                    "unknown artifact kind '{s}' (expected one of: {})",
                    Self::ALL.map(Self::as_str).join(", ")
                ))
            })
    }
}

/// How an artifact's payload is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    /// Human-readable text (JSON, `.mlir`, `.ll`).
    #[default]
    Textual,
    /// Binary encoding (msgpack, MLIR bytecode, LLVM bitcode, native code).
    Binary,
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Textual => write!(f, "textual"),
            Self::Binary => write!(f, "binary"),
        }
    }
}

const MLIR_BYTECODE_MAGIC: &[u8] = b"ML\xEFR";
const LLVM_BITCODE_MAGIC: &[u8] = b"BC\xC0\xDE";
const LLVM_BITCODE_WRAPPER_MAGIC: &[u8] = b"\xDE\xC0\x17\x0B";
const ELF_MAGIC: &[u8] = b"\x7FELF";
const MACHO_MAGICS: [&[u8]; 4] = [
    b"\xFE\xED\xFA\xCE",
    b"\xFE\xED\xFA\xCF",
    b"\xCE\xFA\xED\xFE",
    b"\xCF\xFA\xED\xFE",
];
// COFF machine types: i386, x86-64, arm64.
const COFF_MAGICS: [&[u8]; 3] = [b"\x4C\x01", b"\x64\x86", b"\x64\xAA"];

/// A payload passed between stages, tagged with its kind and encoding.
#[derive(Clone, PartialEq, Eq)]
pub struct Artifact {
    kind: ArtifactKind,
    encoding: Encoding,
    payload: Vec<u8>,
}

impl Artifact {
    /// Creates a new artifact.
    #[must_use]
    pub fn new(kind: ArtifactKind, encoding: Encoding, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            encoding,
            payload: payload.into(),
        }
    }

    /// Creates a textual artifact.
    #[must_use]
    pub fn text(kind: ArtifactKind, text: impl Into<String>) -> Self {
        Self::new(kind, Encoding::Textual, text.into().into_bytes())
    }

    /// Returns the artifact kind.
    #[must_use]
    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    /// Returns the payload encoding.
    #[must_use]
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Returns the raw payload.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.payload
    }

    /// Consumes the artifact, returning the payload.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.payload
    }

    /// Returns the payload as UTF-8 text.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not valid UTF-8.
    pub fn as_text(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.payload)
    }

    /// Returns the payload size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Returns true if the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Returns the hex-encoded SHA-256 digest of the payload.
    #[must_use]
    pub fn digest(&self) -> String {
        hex::encode(Sha256::digest(&self.payload))
    }

    /// Returns a compact description suitable for reports.
    #[must_use]
    pub fn summary(&self) -> ArtifactSummary {
        ArtifactSummary {
            kind: self.kind,
            encoding: self.encoding,
            bytes: self.payload.len(),
            sha256: self.digest(),
        }
    }

    /// Checks the payload against the structural rules of its kind.
    ///
    /// This catches tool/version mismatches (a tool printing a usage message,
    /// an empty file, text where bitcode was expected). It does not check IR
    /// semantics.
    ///
    /// # Errors
    ///
    /// Returns a description of the first violated rule.
    pub fn validate(&self) -> Result<(), String> {
        if !self.kind.supports(self.encoding) {
            return Err(format!(
                "{} artifacts cannot use the {} encoding",
                self.kind, self.encoding
            ));
        }

        match (self.kind, self.encoding) {
            (ArtifactKind::Source | ArtifactKind::RunOutput, _) => {
                self.as_text()
                    .map_err(|e| format!("{} is not valid UTF-8: {e}", self.kind))?;
                Ok(())
            }
            (ArtifactKind::Hugr, Encoding::Textual) => {
                let text = self.non_empty_text()?;
                match serde_json::from_str::<serde_json::Value>(text) {
                    Ok(serde_json::Value::Object(_)) => Ok(()),
                    Ok(_) => Err("HUGR JSON must be an object".to_string()),
                    Err(e) => Err(format!("HUGR is not valid JSON: {e}")),
                }
            }
            (ArtifactKind::Hugr, Encoding::Binary) => match self.payload.first() {
                // msgpack fixmap, map16 or map32
                Some(0x80..=0x8F | 0xDE | 0xDF) => Ok(()),
                Some(byte) => Err(format!("HUGR msgpack must start with a map, found byte 0x{byte:02X}")),
                None => Err("hugr artifact is empty".to_string()),
            },
            (ArtifactKind::HugrMlir | ArtifactKind::LoweredMlir | ArtifactKind::Llvm, Encoding::Textual) => {
                self.non_empty_text().map(|_| ())
            }
            (ArtifactKind::HugrMlir | ArtifactKind::LoweredMlir, Encoding::Binary) => {
                self.expect_magic(&[MLIR_BYTECODE_MAGIC], "MLIR bytecode")
            }
            (ArtifactKind::Llvm, Encoding::Binary) => self.expect_magic(
                &[LLVM_BITCODE_MAGIC, LLVM_BITCODE_WRAPPER_MAGIC],
                "LLVM bitcode",
            ),
            (ArtifactKind::Object, _) => {
                let mut magics = vec![ELF_MAGIC];
                magics.extend(MACHO_MAGICS);
                magics.extend(COFF_MAGICS);
                self.expect_magic(&magics, "object file")
            }
            (ArtifactKind::Executable, _) => {
                let mut magics = vec![ELF_MAGIC, b"MZ", b"#!"];
                magics.extend(MACHO_MAGICS);
                self.expect_magic(&magics, "executable")
            }
        }
    }

    fn non_empty_text(&self) -> Result<&str, String> {
        let text = self
            .as_text()
            .map_err(|e| format!("{} is not valid UTF-8: {e}", self.kind))?;
        if text.trim().is_empty() {
            return Err(format!("{} artifact is empty", self.kind));
        }
        Ok(text)
    }

    fn expect_magic(&self, magics: &[&[u8]], what: &str) -> Result<(), String> {
        if self.payload.is_empty() {
            return Err(format!("{} artifact is empty", self.kind));
        }
        if magics.iter().any(|magic| self.payload.starts_with(magic)) {
            Ok(())
        } else {
            let head: Vec<String> = self
                .payload
                .iter()
                .take(4)
                .map(|b| format!("{b:02X}"))
                .collect();
            Err(format!(
                "payload does not look like {what} (leading bytes: {})",
                head.join(" ")
            ))
        }
    }
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artifact")
            .field("kind", &self.kind)
            .field("encoding", &self.encoding)
            .field("bytes", &self.payload.len())
            .finish()
    }
}

/// Size and digest of an artifact, recorded in run reports instead of the
/// payload itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSummary {
    /// The artifact kind.
    pub kind: ArtifactKind,
    /// The payload encoding.
    pub encoding: Encoding,
    /// Payload size in bytes.
    pub bytes: usize,
    /// Hex-encoded SHA-256 of the payload.
    pub sha256: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_kind_order_follows_toolchain() {
        assert!(ArtifactKind::Source < ArtifactKind::Hugr);
        assert!(ArtifactKind::Llvm < ArtifactKind::Object);
        assert!(ArtifactKind::Executable < ArtifactKind::RunOutput);
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("hugr-mlir".parse::<ArtifactKind>().unwrap(), ArtifactKind::HugrMlir);
        assert_eq!("run-output".parse::<ArtifactKind>().unwrap(), ArtifactKind::RunOutput);

        let err = "bitcode".parse::<ArtifactKind>().unwrap_err();
        assert!(err.to_string().contains("unknown artifact kind 'bitcode'"));
    }

    #[test]
    fn test_kind_serializes_kebab_case() {
        let json = serde_json::to_string(&ArtifactKind::LoweredMlir).unwrap();
        assert_eq!(json, r#""lowered-mlir""#);
    }

    #[test]
    fn test_detect_encoding_from_extension() {
        let cases = [
            (ArtifactKind::Hugr, "prog.json", Some(Encoding::Textual)),
            (ArtifactKind::Hugr, "prog.msgpack", Some(Encoding::Binary)),
            (ArtifactKind::HugrMlir, "prog.mlir", Some(Encoding::Textual)),
            (ArtifactKind::LoweredMlir, "prog.mlirbc", Some(Encoding::Binary)),
            (ArtifactKind::Llvm, "prog.ll", Some(Encoding::Textual)),
            (ArtifactKind::Llvm, "prog.BC", Some(Encoding::Binary)),
            (ArtifactKind::Llvm, "prog", None),
            (ArtifactKind::Hugr, "prog.mlir", None),
            (ArtifactKind::Source, "prog", Some(Encoding::Textual)),
            (ArtifactKind::Object, "prog.o", Some(Encoding::Binary)),
        ];

        for (kind, file, expected) in cases {
            assert_eq!(
                kind.detect_encoding(&PathBuf::from(file)),
                expected,
                "{kind} {file}"
            );
        }
    }

    #[test]
    fn test_validate_hugr_json() {
        assert!(Artifact::text(ArtifactKind::Hugr, r#"{"version": "v1", "nodes": []}"#)
            .validate()
            .is_ok());

        let err = Artifact::text(ArtifactKind::Hugr, "usage: tool [options]")
            .validate()
            .unwrap_err();
        assert!(err.contains("not valid JSON"));

        let err = Artifact::text(ArtifactKind::Hugr, "[1, 2]").validate().unwrap_err();
        assert!(err.contains("must be an object"));
    }

    #[test]
    fn test_validate_hugr_msgpack() {
        assert!(Artifact::new(ArtifactKind::Hugr, Encoding::Binary, vec![0x82, 0xA1])
            .validate()
            .is_ok());
        assert!(Artifact::new(ArtifactKind::Hugr, Encoding::Binary, vec![0x01])
            .validate()
            .is_err());
    }

    #[test]
    fn test_validate_empty_text_rejected() {
        let err = Artifact::text(ArtifactKind::HugrMlir, "  \n").validate().unwrap_err();
        assert!(err.contains("empty"));
    }

    #[test]
    fn test_validate_non_utf8_text_rejected() {
        let artifact = Artifact::new(ArtifactKind::Llvm, Encoding::Textual, vec![0xFF, 0xFE]);
        assert!(artifact.validate().unwrap_err().contains("UTF-8"));
    }

    #[test]
    fn test_validate_bitcode_magic() {
        let mut bitcode = LLVM_BITCODE_MAGIC.to_vec();
        bitcode.extend([0, 1, 2]);
        assert!(Artifact::new(ArtifactKind::Llvm, Encoding::Binary, bitcode).validate().is_ok());

        let err = Artifact::new(ArtifactKind::Llvm, Encoding::Binary, b"; ModuleID".to_vec())
            .validate()
            .unwrap_err();
        assert!(err.contains("LLVM bitcode"));
    }

    #[test]
    fn test_validate_object_and_executable() {
        let elf = b"\x7FELF\x02\x01\x01".to_vec();
        assert!(Artifact::new(ArtifactKind::Object, Encoding::Binary, elf.clone()).validate().is_ok());
        assert!(Artifact::new(ArtifactKind::Executable, Encoding::Binary, elf).validate().is_ok());
        assert!(Artifact::new(ArtifactKind::Executable, Encoding::Binary, b"#!/bin/sh\n".to_vec())
            .validate()
            .is_ok());
        assert!(Artifact::new(ArtifactKind::Object, Encoding::Binary, b"#!/bin/sh\n".to_vec())
            .validate()
            .is_err());
    }

    #[test]
    fn test_validate_rejects_unsupported_encoding() {
        let artifact = Artifact::new(ArtifactKind::Object, Encoding::Textual, b"\x7FELF".to_vec());
        assert!(artifact.validate().unwrap_err().contains("cannot use the textual encoding"));
    }

    #[test]
    fn test_summary_digest() {
        let artifact = Artifact::text(ArtifactKind::RunOutput, "abc");
        let summary = artifact.summary();

        assert_eq!(summary.bytes, 3);
        assert_eq!(
            summary.sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_debug_omits_payload() {
        let artifact = Artifact::text(ArtifactKind::Source, "secret program");
        let debug = format!("{artifact:?}");
        assert!(debug.contains("bytes: 14"));
        assert!(!debug.contains("secret"));
    }
}
