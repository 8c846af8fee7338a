use crate::constants::DOCUMENT_SEPARATOR;
use crate::error::{Error, Result};
use crate::oci::digest::sha256_string;
use serde::Deserialize;
use serde_yaml::Value;

/// Parses a multi-document stream, dropping empty documents
pub fn split_documents(stream: &str, origin: &str) -> Result<Vec<Value>> {
    let mut documents = Vec::new();
    for document in serde_yaml::Deserializer::from_str(stream) {
        let value = Value::deserialize(document).map_err(|e| Error::Manifest {
            origin: origin.to_string(),
            reason: e.to_string(),
        })?;
        if !value.is_null() {
            documents.push(value);
        }
    }
    Ok(documents)
}

/// Serialises each document on its own, without separators
pub fn serialize_documents(documents: &[Value]) -> Result<Vec<String>> {
    documents
        .iter()
        .map(|d| serde_yaml::to_string(d).map_err(Error::from))
        .collect()
}

pub fn join_documents(documents: &[String]) -> String {
    documents.join(DOCUMENT_SEPARATOR)
}

/// Lowercase hex SHA-256 of the documents joined by the separator
pub fn identity(documents: &[String]) -> String {
    sha256_string(&join_documents(documents))
}

/// Splits a combined stream and re-serialises each document, so layout
/// differences in the input do not leak into the output
pub fn normalize(stream: &str, origin: &str) -> Result<Vec<String>> {
    serialize_documents(&split_documents(stream, origin)?)
}
