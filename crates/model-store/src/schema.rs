//! Model schema: the structural definition of a model and the value cells
//! stored against it.
//!
//! Everything here is store independent. A `ModelDef` is identical in every
//! store that holds the model; parameters, output tables and microdata
//! entities are addressed by their harmonized id (`hid`), never by a
//! store-local row id.

use serde::{Deserialize, Serialize};

/// Harmonized id of a parameter, output table or entity.
pub type Hid = i32;

/// One enum item of a classification type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumItem {
    pub id: i32,
    pub name: String,
}

/// Value domain of a type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TypeKind {
    Int,
    Double,
    Bool,
    Str,
    Enum { items: Vec<EnumItem> },
    Range { min: i32, max: i32 },
}

impl TypeKind {
    /// Built-in type for a well-known type name.
    pub fn builtin(type_name: &str) -> Option<TypeKind> {
        match type_name {
            "int" | "integer" | "long" | "llong" | "short" => Some(TypeKind::Int),
            "double" | "float" | "real" | "ldouble" => Some(TypeKind::Double),
            "bool" | "logical" => Some(TypeKind::Bool),
            "string" | "file" => Some(TypeKind::Str),
            _ => None,
        }
    }

    /// Enum item by id, for enum types only.
    pub fn enum_name(&self, id: i32) -> Option<&str> {
        match self {
            TypeKind::Enum { items } => items
                .iter()
                .find(|e| e.id == id)
                .map(|e| e.name.as_str()),
            _ => None,
        }
    }

    /// Enum id by item name, for enum types only.
    pub fn enum_id(&self, name: &str) -> Option<i32> {
        match self {
            TypeKind::Enum { items } => items.iter().find(|e| e.name == name).map(|e| e.id),
            _ => None,
        }
    }
}

/// A model-defined type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDef {
    pub name: String,
    #[serde(flatten)]
    pub kind: TypeKind,
}

/// One dimension of a parameter or output table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimDef {
    pub name: String,
    pub type_name: String,
    pub size: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamDef {
    pub hid: Hid,
    pub name: String,
    pub digest: String,
    pub type_name: String,
    #[serde(default)]
    pub dims: Vec<DimDef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccDef {
    pub acc_id: i32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExprDef {
    pub expr_id: i32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDef {
    pub hid: Hid,
    pub name: String,
    pub digest: String,
    #[serde(default)]
    pub dims: Vec<DimDef>,
    pub accs: Vec<AccDef>,
    pub exprs: Vec<ExprDef>,
}

impl TableDef {
    pub fn expr_by_id(&self, expr_id: i32) -> Option<&ExprDef> {
        self.exprs.iter().find(|e| e.expr_id == expr_id)
    }

    pub fn expr_by_name(&self, name: &str) -> Option<&ExprDef> {
        self.exprs.iter().find(|e| e.name == name)
    }

    pub fn acc_by_id(&self, acc_id: i32) -> Option<&AccDef> {
        self.accs.iter().find(|a| a.acc_id == acc_id)
    }

    pub fn acc_by_name(&self, name: &str) -> Option<&AccDef> {
        self.accs.iter().find(|a| a.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttrDef {
    pub attr_id: i32,
    pub name: String,
    pub type_name: String,
}

/// Microdata entity: the record layout of an entity snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDef {
    pub hid: Hid,
    pub name: String,
    pub digest: String,
    pub attrs: Vec<AttrDef>,
}

/// Structural definition of a model.
///
/// `(name, digest)` is the natural key; the digest covers parameters, tables
/// and types and is the same in every store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDef {
    pub name: String,
    pub digest: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub types: Vec<TypeDef>,
    #[serde(default)]
    pub params: Vec<ParamDef>,
    #[serde(default)]
    pub tables: Vec<TableDef>,
    #[serde(default)]
    pub entities: Vec<EntityDef>,
}

impl ModelDef {
    /// Resolve a type name against model types first, then built-ins.
    pub fn resolve_type(&self, type_name: &str) -> Option<TypeKind> {
        self.types
            .iter()
            .find(|t| t.name == type_name)
            .map(|t| t.kind.clone())
            .or_else(|| TypeKind::builtin(type_name))
    }

    pub fn param_by_hid(&self, hid: Hid) -> Option<&ParamDef> {
        self.params.iter().find(|p| p.hid == hid)
    }

    pub fn param_by_name(&self, name: &str) -> Option<&ParamDef> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn table_by_hid(&self, hid: Hid) -> Option<&TableDef> {
        self.tables.iter().find(|t| t.hid == hid)
    }

    pub fn table_by_name(&self, name: &str) -> Option<&TableDef> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn entity_by_hid(&self, hid: Hid) -> Option<&EntityDef> {
        self.entities.iter().find(|e| e.hid == hid)
    }

    pub fn entity_by_name(&self, name: &str) -> Option<&EntityDef> {
        self.entities.iter().find(|e| e.name == name)
    }
}

/// Language-specific description and notes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescrNote {
    pub lang: String,
    pub descr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// A single typed value. Enum-typed values hold the enum id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum CellValue {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }
}

/// Parameter value for one sub-value and one dimension item combination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamCell {
    pub sub_id: i32,
    pub dims: Vec<i32>,
    pub value: CellValue,
}

/// Output table expression value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExprCell {
    pub expr_id: i32,
    pub dims: Vec<i32>,
    pub value: Option<f64>,
}

/// Output table accumulator value for one sub-value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccCell {
    pub acc_id: i32,
    pub sub_id: i32,
    pub dims: Vec<i32>,
    pub value: Option<f64>,
}

/// Expression and accumulator values of one output table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableValues {
    pub exprs: Vec<ExprCell>,
    pub accs: Vec<AccCell>,
}

impl TableValues {
    pub fn is_empty(&self) -> bool {
        self.exprs.is_empty() && self.accs.is_empty()
    }
}

/// One microdata record: entity key and attribute values in `AttrDef` order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MicroCell {
    pub key: i64,
    pub attrs: Vec<CellValue>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sex_type() -> TypeDef {
        TypeDef {
            name: "SEX".to_string(),
            kind: TypeKind::Enum {
                items: vec![
                    EnumItem {
                        id: 0,
                        name: "F".to_string(),
                    },
                    EnumItem {
                        id: 1,
                        name: "M".to_string(),
                    },
                ],
            },
        }
    }

    #[test]
    fn test_resolve_type_prefers_model_types() {
        let model = ModelDef {
            name: "m".to_string(),
            digest: "d".to_string(),
            version: String::new(),
            types: vec![sex_type()],
            params: vec![],
            tables: vec![],
            entities: vec![],
        };
        assert_eq!(model.resolve_type("double"), Some(TypeKind::Double));
        assert!(matches!(
            model.resolve_type("SEX"),
            Some(TypeKind::Enum { .. })
        ));
        assert_eq!(model.resolve_type("NO_SUCH_TYPE"), None);
    }

    #[test]
    fn test_enum_lookup_both_ways() {
        let kind = sex_type().kind;
        assert_eq!(kind.enum_name(1), Some("M"));
        assert_eq!(kind.enum_id("F"), Some(0));
        assert_eq!(kind.enum_id("X"), None);
        assert_eq!(TypeKind::Int.enum_name(0), None);
    }

    #[test]
    fn test_type_def_json_is_flat() {
        let json = serde_json::to_value(sex_type()).unwrap();
        assert_eq!(json["kind"], "enum");
        assert_eq!(json["items"][1]["name"], "M");

        let range: TypeDef =
            serde_json::from_str(r#"{"name":"AGE","kind":"range","min":0,"max":99}"#).unwrap();
        assert_eq!(range.kind, TypeKind::Range { min: 0, max: 99 });
    }

    #[test]
    fn test_cell_value_null_is_tagged() {
        let json = serde_json::to_string(&CellValue::Null).unwrap();
        assert_eq!(json, r#"{"t":"Null"}"#);
        let back: CellValue = serde_json::from_str(r#"{"t":"Float","v":1.5}"#).unwrap();
        assert_eq!(back, CellValue::Float(1.5));
    }
}
