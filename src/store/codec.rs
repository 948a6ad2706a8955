//! Typed projection between domain entities and store points.
//!
//! All loading validates and projects into typed values here, at the store
//! boundary. A payload that fails projection is a storage error, not a
//! silently deformed record.

use super::{Payload, Point};
use crate::error::{Error, Result};
use crate::types::{
    ContextLevel, LifecycleState, MemoryCategory, MemoryUnit, Scope, SemanticUnit, UnitType,
};

/// Marker distinguishing code units from memories inside one collection.
pub const KIND_CODE: &str = "code_unit";
pub const KIND_MEMORY: &str = "memory";

pub fn unit_to_point(unit: &SemanticUnit, vector: Vec<f32>) -> Point {
    Point {
        id: unit.id.clone(),
        vector,
        payload: Payload {
            project: unit.project.clone(),
            file_path: Some(unit.file_path.clone()),
            language: Some(unit.language.clone()),
            unit_type: Some(unit.unit_type.as_str().to_string()),
            name: Some(unit.name.clone()),
            qualified_name: Some(unit.qualified_name.clone()),
            signature: Some(unit.signature.clone()),
            content: unit.content.clone(),
            category: None,
            context_level: None,
            scope: Some(KIND_CODE.to_string()),
            lifecycle_state: unit.lifecycle_state.as_str().to_string(),
            content_hash: Some(unit.content_hash.clone()),
            tags: Vec::new(),
            imports: unit.imports.clone(),
            start_line: Some(unit.start_line as u64),
            end_line: Some(unit.end_line as u64),
            start_byte: Some(unit.start_byte as u64),
            end_byte: Some(unit.end_byte as u64),
            importance: unit.importance as f64,
            access_count: 0,
            created_at: unit.created_at,
            updated_at: unit.updated_at,
            last_accessed: unit.last_accessed,
            metadata: Default::default(),
        },
    }
}

pub fn point_to_unit(point: &Point) -> Result<SemanticUnit> {
    let payload = &point.payload;
    let missing = |field: &str| Error::storage(format!("code unit {} missing {field}", point.id));
    Ok(SemanticUnit {
        id: point.id.clone(),
        project: payload.project.clone(),
        file_path: payload.file_path.clone().ok_or_else(|| missing("file_path"))?,
        language: payload.language.clone().ok_or_else(|| missing("language"))?,
        unit_type: UnitType::parse(
            payload.unit_type.as_deref().ok_or_else(|| missing("unit_type"))?,
        )?,
        name: payload.name.clone().ok_or_else(|| missing("name"))?,
        qualified_name: payload
            .qualified_name
            .clone()
            .ok_or_else(|| missing("qualified_name"))?,
        signature: payload.signature.clone().unwrap_or_default(),
        content: payload.content.clone(),
        start_line: payload.start_line.unwrap_or(0) as usize,
        end_line: payload.end_line.unwrap_or(0) as usize,
        start_byte: payload.start_byte.unwrap_or(0) as usize,
        end_byte: payload.end_byte.unwrap_or(0) as usize,
        content_hash: payload.content_hash.clone().ok_or_else(|| missing("content_hash"))?,
        imports: payload.imports.clone(),
        importance: payload.importance as f32,
        lifecycle_state: LifecycleState::parse(&payload.lifecycle_state)?,
        created_at: payload.created_at,
        updated_at: payload.updated_at,
        last_accessed: payload.last_accessed,
    })
}

pub fn memory_to_point(memory: &MemoryUnit, vector: Vec<f32>) -> Point {
    Point {
        id: memory.id.clone(),
        vector,
        payload: Payload {
            project: memory.project.clone().unwrap_or_default(),
            file_path: None,
            language: None,
            unit_type: None,
            name: None,
            qualified_name: None,
            signature: None,
            content: memory.content.clone(),
            category: Some(memory.category.as_str().to_string()),
            context_level: Some(memory.context_level.as_str().to_string()),
            scope: Some(memory.scope.as_str().to_string()),
            lifecycle_state: memory.lifecycle_state.as_str().to_string(),
            content_hash: None,
            tags: memory.tags.clone(),
            imports: Vec::new(),
            start_line: None,
            end_line: None,
            start_byte: None,
            end_byte: None,
            importance: memory.importance as f64,
            access_count: 0,
            created_at: memory.created_at,
            updated_at: memory.updated_at,
            last_accessed: memory.last_accessed,
            metadata: memory.metadata.clone(),
        },
    }
}

pub fn point_to_memory(point: &Point) -> Result<MemoryUnit> {
    let payload = &point.payload;
    let missing = |field: &str| Error::storage(format!("memory {} missing {field}", point.id));
    Ok(MemoryUnit {
        id: point.id.clone(),
        content: payload.content.clone(),
        category: MemoryCategory::parse(
            payload.category.as_deref().ok_or_else(|| missing("category"))?,
        )?,
        context_level: ContextLevel::parse(
            payload
                .context_level
                .as_deref()
                .ok_or_else(|| missing("context_level"))?,
        )?,
        scope: Scope::parse(payload.scope.as_deref().ok_or_else(|| missing("scope"))?)?,
        project: (!payload.project.is_empty()).then(|| payload.project.clone()),
        tags: payload.tags.clone(),
        importance: payload.importance as f32,
        embedding: point.vector.clone(),
        metadata: payload.metadata.clone(),
        lifecycle_state: LifecycleState::parse(&payload.lifecycle_state)?,
        created_at: payload.created_at,
        updated_at: payload.updated_at,
        last_accessed: payload.last_accessed,
    })
}

/// Whether a stored point is a parsed code unit (as opposed to a memory).
pub fn is_code_unit(payload: &Payload) -> bool {
    payload.scope.as_deref() == Some(KIND_CODE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{new_id, now_ms, sha256_hex};

    #[test]
    fn unit_roundtrip() {
        let content = "def foo():\n    return 1";
        let unit = SemanticUnit {
            id: new_id(),
            project: "proj".into(),
            file_path: "a.py".into(),
            language: "python".into(),
            unit_type: UnitType::Function,
            name: "foo".into(),
            qualified_name: "foo".into(),
            signature: "def foo():".into(),
            content: content.into(),
            start_line: 1,
            end_line: 2,
            start_byte: 0,
            end_byte: content.len(),
            content_hash: sha256_hex(content.as_bytes()),
            imports: vec!["os".into()],
            importance: 0.7,
            lifecycle_state: LifecycleState::Active,
            created_at: now_ms(),
            updated_at: now_ms(),
            last_accessed: now_ms(),
        };

        let point = unit_to_point(&unit, vec![1.0, 0.0]);
        assert!(is_code_unit(&point.payload));
        let back = point_to_unit(&point).unwrap();
        assert_eq!(back.qualified_name, unit.qualified_name);
        assert_eq!(back.content_hash, unit.content_hash);
        assert_eq!(back.imports, unit.imports);
        assert_eq!(back.start_byte, unit.start_byte);
    }

    #[test]
    fn memory_roundtrip() {
        let memory = MemoryUnit {
            id: new_id(),
            content: "use tabs, not spaces".into(),
            category: MemoryCategory::Preference,
            context_level: ContextLevel::User,
            scope: Scope::Global,
            project: None,
            tags: vec!["style".into()],
            importance: 0.9,
            embedding: vec![0.5, 0.5],
            metadata: Default::default(),
            lifecycle_state: LifecycleState::Active,
            created_at: now_ms(),
            updated_at: now_ms(),
            last_accessed: now_ms(),
        };

        let point = memory_to_point(&memory, memory.embedding.clone());
        assert!(!is_code_unit(&point.payload));
        let back = point_to_memory(&point).unwrap();
        assert_eq!(back.content, memory.content);
        assert_eq!(back.category, MemoryCategory::Preference);
        assert_eq!(back.project, None);
        assert_eq!(back.embedding, memory.embedding);
    }

    #[test]
    fn corrupt_payload_is_storage_error() {
        let point = Point {
            id: "x".into(),
            vector: vec![],
            payload: Payload {
                content: "body".into(),
                lifecycle_state: "ACTIVE".into(),
                ..Default::default()
            },
        };
        assert!(point_to_unit(&point).is_err());
        assert!(point_to_memory(&point).is_err());
    }
}
