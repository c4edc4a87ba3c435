//! Identidad content-addressed.
//!
//! Todo lo deduplicable (especificaciones, moléculas, claves de record) se
//! identifica por el hash blake3 de su JSON canónico: objetos con claves
//! ordenadas, sin whitespace. Así dos submissions semánticamente idénticas
//! producen el mismo id aunque el orden de campos del JSON de entrada difiera.

use serde_json::Value;
use std::collections::BTreeMap;

use blake3::Hasher;

/// Serializa un `Value` a su forma canónica (claves ordenadas, compacto).
pub fn to_canonical_json(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        // serde_json preserva la representación textual del número parseado;
        // suficiente mientras los payloads no re-serialicen floats por rutas
        // distintas.
        Value::Number(n) => n.to_string(),
        Value::String(s) => serde_json::to_string(s).unwrap_or_default(),
        Value::Array(arr) => {
            let items: Vec<String> = arr.iter().map(to_canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        Value::Object(map) => {
            let tree: BTreeMap<&String, String> =
                map.iter().map(|(k, v)| (k, to_canonical_json(v))).collect();
            let items: Vec<String> = tree
                .into_iter()
                .map(|(k, v)| format!("{}:{}", serde_json::to_string(k).unwrap_or_default(), v))
                .collect();
            format!("{{{}}}", items.join(","))
        }
    }
}

/// Hashea un string y devuelve hex.
pub fn hash_str(input: &str) -> String {
    let mut h = Hasher::new();
    h.update(input.as_bytes());
    h.finalize().to_hex().to_string()
}

/// Hash canónico de un `Value`.
pub fn hash_value(value: &Value) -> String {
    hash_str(&to_canonical_json(value))
}

/// Identidad de contenido con namespace de tipo (dos payloads iguales de
/// tipos distintos nunca colisionan) y versionado del formato canónico.
pub fn content_id(kind: &str, value: &Value) -> String {
    let tagged = serde_json::json!({
        "scheduler_version": crate::constants::SCHEDULER_VERSION,
        "kind": kind,
        "content": value,
    });
    hash_value(&tagged)
}
