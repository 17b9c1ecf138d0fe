//! Namespace and index definitions.

use rxbridge_sys::{
    ConnectOpts, StorageOpts, CONNECT_OPT_ALLOW_NAMESPACE_ERRORS, CONNECT_OPT_AUTOREPAIR,
    CONNECT_OPT_OPEN_NAMESPACES, CONNECT_OPT_WARN_VERSION, STORAGE_OPT_CREATE_IF_MISSING,
    STORAGE_OPT_DROP_ON_FILE_FORMAT_ERROR, STORAGE_OPT_ENABLED,
};
use serde::{Deserialize, Serialize};

/// Storage options of a namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageOptions {
    /// Persist the namespace.
    pub enabled: bool,
    /// Drop stored data the engine cannot read instead of failing.
    pub drop_on_file_format_error: bool,
    /// Create storage when it does not exist.
    pub create_if_missing: bool,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            drop_on_file_format_error: false,
            create_if_missing: true,
        }
    }
}

impl StorageOptions {
    /// Sets whether storage is enabled.
    #[must_use]
    pub const fn enabled(mut self, value: bool) -> Self {
        self.enabled = value;
        self
    }

    /// Sets whether unreadable storage is dropped.
    #[must_use]
    pub const fn drop_on_file_format_error(mut self, value: bool) -> Self {
        self.drop_on_file_format_error = value;
        self
    }

    /// Sets whether missing storage is created.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Folds the flags into the native bit field.
    pub fn to_native(self) -> StorageOpts {
        let mut options = 0;
        if self.enabled {
            options |= STORAGE_OPT_ENABLED;
        }
        if self.drop_on_file_format_error {
            options |= STORAGE_OPT_DROP_ON_FILE_FORMAT_ERROR;
        }
        if self.create_if_missing {
            options |= STORAGE_OPT_CREATE_IF_MISSING;
        }
        StorageOpts { options }
    }
}

/// Options for connecting an engine instance to its storage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Load every stored namespace during connect.
    pub open_namespaces: bool,
    /// Keep going when a namespace fails to load.
    pub allow_namespace_errors: bool,
    /// Repair damaged storage.
    pub autorepair: bool,
    /// Downgrade a version mismatch to a warning.
    pub warn_version: bool,
}

impl ConnectOptions {
    /// Folds the flags into the native record.
    pub fn to_native(self) -> ConnectOpts {
        let mut options = 0;
        if self.open_namespaces {
            options |= CONNECT_OPT_OPEN_NAMESPACES;
        }
        if self.allow_namespace_errors {
            options |= CONNECT_OPT_ALLOW_NAMESPACE_ERRORS;
        }
        if self.autorepair {
            options |= CONNECT_OPT_AUTOREPAIR;
        }
        if self.warn_version {
            options |= CONNECT_OPT_WARN_VERSION;
        }
        ConnectOpts {
            options,
            expected_cluster_id: 0,
        }
    }
}

/// Index structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexType {
    /// Hash map, equality lookups.
    Hash,
    /// Ordered tree, range lookups.
    Tree,
    /// Full-text index.
    Text,
    /// Expiring index over a timestamp field.
    Ttl,
    /// Spatial index.
    Rtree,
    /// Column store without an index.
    #[serde(rename = "-")]
    Column,
}

/// Value type of an indexed field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// Boolean.
    Bool,
    /// 32-bit integer.
    Int,
    /// 64-bit integer.
    Int64,
    /// 64-bit float.
    Double,
    /// 32-bit float.
    Float,
    /// UTF-8 string.
    String,
    /// UUID.
    Uuid,
    /// Composite of several fields.
    Composite,
}

/// String collation of an index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollateMode {
    /// Byte-wise.
    #[default]
    #[serde(rename = "")]
    None,
    /// Case-insensitive ASCII.
    Ascii,
    /// Case-insensitive UTF-8.
    Utf8,
    /// Numeric prefix ordering.
    Numeric,
    /// Custom letter order, see [`IndexDef::sort_order_letters`].
    Custom,
}

/// Index definition, sent to the engine as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDef {
    /// Index name.
    pub name: String,
    /// JSON paths covered by the index.
    pub json_paths: Vec<String>,
    /// Index structure.
    pub index_type: IndexType,
    /// Field value type.
    pub field_type: FieldType,
    /// Primary key.
    pub is_pk: bool,
    /// Array field.
    pub is_array: bool,
    /// Dense index, smaller but slower.
    pub is_dense: bool,
    /// Sparse index, items without the field are not indexed.
    pub is_sparse: bool,
    /// String collation.
    pub collate_mode: CollateMode,
    /// Letter order for [`CollateMode::Custom`].
    pub sort_order_letters: String,
    /// Index-type specific configuration, passed through.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
}

impl IndexDef {
    /// A non-array, non-key index over the field of the same name.
    pub fn new(name: impl Into<String>, index_type: IndexType, field_type: FieldType) -> Self {
        let name = name.into();
        Self {
            json_paths: vec![name.clone()],
            name,
            index_type,
            field_type,
            is_pk: false,
            is_array: false,
            is_dense: false,
            is_sparse: false,
            collate_mode: CollateMode::None,
            sort_order_letters: String::new(),
            config: None,
        }
    }

    /// Marks the index as primary key.
    #[must_use]
    pub fn pk(mut self) -> Self {
        self.is_pk = true;
        self
    }

    /// Marks the indexed field as an array.
    #[must_use]
    pub fn array(mut self) -> Self {
        self.is_array = true;
        self
    }

    /// Sets the collation.
    #[must_use]
    pub fn collate(mut self, mode: CollateMode) -> Self {
        self.collate_mode = mode;
        self
    }

    /// Serialises the definition for `add_index`.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn storage_bits() {
        assert_eq!(StorageOptions::default().to_native().options, 0b101);
        let all = StorageOptions::default().drop_on_file_format_error(true);
        assert_eq!(all.to_native().options, 0b111);
        let none = StorageOptions::default().enabled(false).create_if_missing(false);
        assert_eq!(none.to_native(), StorageOpts::default());
    }

    #[test]
    fn connect_bits() {
        assert_eq!(ConnectOptions::default().to_native().options, 0);
        let opts = ConnectOptions {
            open_namespaces: true,
            warn_version: true,
            ..Default::default()
        };
        assert_eq!(opts.to_native().options, 0b1_0001);
    }

    #[test]
    fn index_json_uses_snake_case() {
        let def = IndexDef::new("id", IndexType::Hash, FieldType::Int).pk();
        let value: serde_json::Value = serde_json::from_str(&def.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "name": "id",
                "json_paths": ["id"],
                "index_type": "hash",
                "field_type": "int",
                "is_pk": true,
                "is_array": false,
                "is_dense": false,
                "is_sparse": false,
                "collate_mode": "",
                "sort_order_letters": "",
            })
        );
    }

    #[test]
    fn column_index_and_config() {
        let mut def = IndexDef::new("payload", IndexType::Column, FieldType::String).collate(CollateMode::Utf8);
        def.config = Some(json!({"enable_translit": false}));
        let value: serde_json::Value = serde_json::to_value(&def).unwrap();
        assert_eq!(value["index_type"], "-");
        assert_eq!(value["collate_mode"], "utf8");
        assert_eq!(value["config"]["enable_translit"], false);
    }
}
