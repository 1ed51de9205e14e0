//! Value codec: converts value cells to and from canonical CSV.
//!
//! A [`Layout`] is derived from the model definition of one parameter,
//! output table or microdata entity and fixes the CSV header and the
//! conversion of every column. Headers:
//!
//! ```text
//! parameter:    sub_id,<dims...>,param_value
//! expressions:  expr_name,<dims...>,expr_value          (expr_id in id mode)
//! accumulators: acc_name,sub_id,<dims...>,acc_value     (acc_id in id mode)
//! microdata:    key,<attributes...>
//! ```
//!
//! Null values are written as the `NULL` token, unquoted. A string cell
//! whose text is exactly `NULL` is written the same way and reads back as
//! null; an empty string stays an empty field. In label mode enum-typed
//! dimension items and values are written as enum names; in id mode every
//! column is numeric.

pub mod encoding;
pub mod format;

use std::marker::PhantomData;

use csv::StringRecord;
use model_store::{
    AccCell, CellValue, DimDef, EntityDef, EnumItem, ExprCell, MicroCell, ModelDef, ParamCell,
    ParamDef, TableDef, TypeKind,
};

use crate::config::CodecConfig;
use crate::error::{CopyError, Result};
use format::DoubleFormat;

/// Literal written for null cells. Also matches a string cell holding
/// this exact text, which therefore decodes as null.
pub const NULL_TOKEN: &str = "NULL";

static FLOAT_CODEC: ItemCodec = ItemCodec::Float;

/// Conversion of one column.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemCodec {
    Int,
    Float,
    Bool,
    Str,
    Enum(Vec<EnumItem>),
}

impl ItemCodec {
    fn for_type(model: &ModelDef, type_name: &str, owner: &str) -> Result<Self> {
        match model.resolve_type(type_name) {
            Some(TypeKind::Int) | Some(TypeKind::Range { .. }) => Ok(ItemCodec::Int),
            Some(TypeKind::Double) => Ok(ItemCodec::Float),
            Some(TypeKind::Bool) => Ok(ItemCodec::Bool),
            Some(TypeKind::Str) => Ok(ItemCodec::Str),
            Some(TypeKind::Enum { items }) => Ok(ItemCodec::Enum(items)),
            None => Err(CopyError::SchemaMismatch(format!(
                "{owner}: unknown type {type_name}"
            ))),
        }
    }

    fn encode_item(&self, id: i32, labels: bool) -> std::result::Result<String, String> {
        match self {
            ItemCodec::Enum(items) if labels => items
                .iter()
                .find(|e| e.id == id)
                .map(|e| e.name.clone())
                .ok_or_else(|| format!("unknown enum id {id}")),
            _ => Ok(id.to_string()),
        }
    }

    fn decode_item(&self, text: &str, labels: bool) -> std::result::Result<i32, String> {
        match self {
            ItemCodec::Enum(items) if labels => items
                .iter()
                .find(|e| e.name == text)
                .map(|e| e.id)
                .ok_or_else(|| format!("unknown enum item `{text}`")),
            _ => text
                .trim()
                .parse()
                .map_err(|_| format!("invalid item id `{text}`")),
        }
    }

    fn encode_value(
        &self,
        value: &CellValue,
        labels: bool,
        format: &DoubleFormat,
    ) -> std::result::Result<String, String> {
        match value {
            CellValue::Null => Ok(NULL_TOKEN.to_string()),
            CellValue::Int(n) => match self {
                ItemCodec::Enum(_) if labels => {
                    let id = i32::try_from(*n).map_err(|_| format!("enum id {n} out of range"))?;
                    self.encode_item(id, labels)
                }
                _ => Ok(n.to_string()),
            },
            CellValue::Float(f) => Ok(format.format(*f)),
            CellValue::Bool(b) => Ok(b.to_string()),
            CellValue::Str(s) => Ok(s.clone()),
        }
    }

    fn decode_value(&self, text: &str, labels: bool) -> std::result::Result<CellValue, String> {
        if text == NULL_TOKEN {
            return Ok(CellValue::Null);
        }
        match self {
            ItemCodec::Int => parse_int(text).map(CellValue::Int),
            ItemCodec::Float => parse_float(text).map(CellValue::Float),
            ItemCodec::Bool => match text.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(CellValue::Bool(true)),
                "false" | "0" => Ok(CellValue::Bool(false)),
                _ => Err(format!("invalid bool `{text}`")),
            },
            ItemCodec::Str => Ok(CellValue::Str(text.to_string())),
            ItemCodec::Enum(_) if labels => self
                .decode_item(text, labels)
                .map(|id| CellValue::Int(i64::from(id))),
            ItemCodec::Enum(_) => parse_int(text).map(CellValue::Int),
        }
    }
}

fn parse_int(text: &str) -> std::result::Result<i64, String> {
    text.trim()
        .parse()
        .map_err(|_| format!("invalid integer `{text}`"))
}

fn parse_float(text: &str) -> std::result::Result<f64, String> {
    text.trim()
        .parse()
        .map_err(|_| format!("invalid number `{text}`"))
}

fn encode_opt_float(value: Option<f64>, format: &DoubleFormat) -> String {
    match value {
        Some(v) => format.format(v),
        None => NULL_TOKEN.to_string(),
    }
}

fn decode_opt_float(text: &str) -> std::result::Result<Option<f64>, String> {
    if text == NULL_TOKEN {
        Ok(None)
    } else {
        parse_float(text).map(Some)
    }
}

/// Kind of value table a layout describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Param,
    Expr,
    Acc,
    Micro,
}

/// CSV shape of one value table.
#[derive(Debug, Clone)]
pub struct Layout {
    kind: TableKind,
    name: String,
    header: Vec<String>,
    labels: bool,
    /// Expression or accumulator ids and names
    keys: Vec<(i32, String)>,
    dims: Vec<ItemCodec>,
    values: Vec<ItemCodec>,
    format: DoubleFormat,
}

impl Layout {
    pub fn param(model: &ModelDef, param: &ParamDef, cfg: &CodecConfig) -> Result<Self> {
        let mut header = vec!["sub_id".to_string()];
        header.extend(param.dims.iter().map(|d| d.name.clone()));
        header.push("param_value".to_string());
        Ok(Self {
            kind: TableKind::Param,
            name: param.name.clone(),
            header,
            labels: !cfg.id_csv,
            keys: Vec::new(),
            dims: dim_codecs(model, &param.dims, &param.name)?,
            values: vec![ItemCodec::for_type(model, &param.type_name, &param.name)?],
            format: cfg.double_format,
        })
    }

    pub fn expr(model: &ModelDef, table: &TableDef, cfg: &CodecConfig) -> Result<Self> {
        let key = if cfg.id_csv { "expr_id" } else { "expr_name" };
        let mut header = vec![key.to_string()];
        header.extend(table.dims.iter().map(|d| d.name.clone()));
        header.push("expr_value".to_string());
        Ok(Self {
            kind: TableKind::Expr,
            name: table.name.clone(),
            header,
            labels: !cfg.id_csv,
            keys: table
                .exprs
                .iter()
                .map(|e| (e.expr_id, e.name.clone()))
                .collect(),
            dims: dim_codecs(model, &table.dims, &table.name)?,
            values: vec![ItemCodec::Float],
            format: cfg.double_format,
        })
    }

    pub fn acc(model: &ModelDef, table: &TableDef, cfg: &CodecConfig) -> Result<Self> {
        let key = if cfg.id_csv { "acc_id" } else { "acc_name" };
        let mut header = vec![key.to_string(), "sub_id".to_string()];
        header.extend(table.dims.iter().map(|d| d.name.clone()));
        header.push("acc_value".to_string());
        Ok(Self {
            kind: TableKind::Acc,
            name: table.name.clone(),
            header,
            labels: !cfg.id_csv,
            keys: table
                .accs
                .iter()
                .map(|a| (a.acc_id, a.name.clone()))
                .collect(),
            dims: dim_codecs(model, &table.dims, &table.name)?,
            values: vec![ItemCodec::Float],
            format: cfg.double_format,
        })
    }

    pub fn micro(model: &ModelDef, entity: &EntityDef, cfg: &CodecConfig) -> Result<Self> {
        let mut header = vec!["key".to_string()];
        header.extend(entity.attrs.iter().map(|a| a.name.clone()));
        let values = entity
            .attrs
            .iter()
            .map(|a| ItemCodec::for_type(model, &a.type_name, &entity.name))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            kind: TableKind::Micro,
            name: entity.name.clone(),
            header,
            labels: !cfg.id_csv,
            keys: Vec::new(),
            dims: Vec::new(),
            values,
            format: cfg.double_format,
        })
    }

    pub fn kind(&self) -> TableKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    fn expect_kind(&self, kind: TableKind) -> Result<()> {
        if self.kind == kind {
            Ok(())
        } else {
            Err(CopyError::SchemaMismatch(format!(
                "{} is a {:?} table, not {:?}",
                self.name, self.kind, kind
            )))
        }
    }

    fn encode_key(&self, id: i32) -> std::result::Result<String, String> {
        if !self.labels {
            return Ok(id.to_string());
        }
        self.keys
            .iter()
            .find(|(k, _)| *k == id)
            .map(|(_, name)| name.clone())
            .ok_or_else(|| format!("unknown key id {id}"))
    }

    fn decode_key(&self, text: &str) -> std::result::Result<i32, String> {
        if !self.labels {
            return text
                .trim()
                .parse()
                .map_err(|_| format!("invalid key id `{text}`"));
        }
        self.keys
            .iter()
            .find(|(_, name)| name == text)
            .map(|(k, _)| *k)
            .ok_or_else(|| format!("unknown key `{text}`"))
    }

    fn encode_dims(&self, dims: &[i32], out: &mut Vec<String>) -> std::result::Result<(), String> {
        if dims.len() != self.dims.len() {
            return Err(format!(
                "expected {} dimensions, found {}",
                self.dims.len(),
                dims.len()
            ));
        }
        for (codec, id) in self.dims.iter().zip(dims) {
            out.push(codec.encode_item(*id, self.labels)?);
        }
        Ok(())
    }

    fn decode_dims<'r>(
        &self,
        fields: impl Iterator<Item = &'r str>,
    ) -> std::result::Result<Vec<i32>, String> {
        self.dims
            .iter()
            .zip(fields)
            .map(|(codec, text)| codec.decode_item(text, self.labels))
            .collect()
    }

    fn value_codec(&self) -> &ItemCodec {
        self.values.first().unwrap_or(&FLOAT_CODEC)
    }
}

fn dim_codecs(model: &ModelDef, dims: &[DimDef], owner: &str) -> Result<Vec<ItemCodec>> {
    dims.iter()
        .map(|d| ItemCodec::for_type(model, &d.type_name, owner))
        .collect()
}

/// A value cell with a CSV row form.
pub trait CsvCell: Sized {
    const KIND: TableKind;

    fn to_record(&self, layout: &Layout) -> std::result::Result<Vec<String>, String>;

    fn from_record(record: &StringRecord, layout: &Layout) -> std::result::Result<Self, String>;
}

fn field(record: &StringRecord, i: usize) -> std::result::Result<&str, String> {
    record.get(i).ok_or_else(|| format!("missing column {}", i + 1))
}

fn check_width(record: &StringRecord, layout: &Layout) -> std::result::Result<(), String> {
    if record.len() == layout.header.len() {
        Ok(())
    } else {
        Err(format!(
            "expected {} columns, found {}",
            layout.header.len(),
            record.len()
        ))
    }
}

impl CsvCell for ParamCell {
    const KIND: TableKind = TableKind::Param;

    fn to_record(&self, layout: &Layout) -> std::result::Result<Vec<String>, String> {
        let mut rec = vec![self.sub_id.to_string()];
        layout.encode_dims(&self.dims, &mut rec)?;
        rec.push(
            layout
                .value_codec()
                .encode_value(&self.value, layout.labels, &layout.format)?,
        );
        Ok(rec)
    }

    fn from_record(record: &StringRecord, layout: &Layout) -> std::result::Result<Self, String> {
        check_width(record, layout)?;
        let n = layout.dims.len();
        let sub_id = field(record, 0)?;
        Ok(ParamCell {
            sub_id: sub_id
                .trim()
                .parse()
                .map_err(|_| format!("invalid sub_id `{sub_id}`"))?,
            dims: layout.decode_dims(record.iter().skip(1))?,
            value: layout
                .value_codec()
                .decode_value(field(record, n + 1)?, layout.labels)?,
        })
    }
}

impl CsvCell for ExprCell {
    const KIND: TableKind = TableKind::Expr;

    fn to_record(&self, layout: &Layout) -> std::result::Result<Vec<String>, String> {
        let mut rec = vec![layout.encode_key(self.expr_id)?];
        layout.encode_dims(&self.dims, &mut rec)?;
        rec.push(encode_opt_float(self.value, &layout.format));
        Ok(rec)
    }

    fn from_record(record: &StringRecord, layout: &Layout) -> std::result::Result<Self, String> {
        check_width(record, layout)?;
        let n = layout.dims.len();
        Ok(ExprCell {
            expr_id: layout.decode_key(field(record, 0)?)?,
            dims: layout.decode_dims(record.iter().skip(1))?,
            value: decode_opt_float(field(record, n + 1)?)?,
        })
    }
}

impl CsvCell for AccCell {
    const KIND: TableKind = TableKind::Acc;

    fn to_record(&self, layout: &Layout) -> std::result::Result<Vec<String>, String> {
        let mut rec = vec![layout.encode_key(self.acc_id)?, self.sub_id.to_string()];
        layout.encode_dims(&self.dims, &mut rec)?;
        rec.push(encode_opt_float(self.value, &layout.format));
        Ok(rec)
    }

    fn from_record(record: &StringRecord, layout: &Layout) -> std::result::Result<Self, String> {
        check_width(record, layout)?;
        let n = layout.dims.len();
        let sub_id = field(record, 1)?;
        Ok(AccCell {
            acc_id: layout.decode_key(field(record, 0)?)?,
            sub_id: sub_id
                .trim()
                .parse()
                .map_err(|_| format!("invalid sub_id `{sub_id}`"))?,
            dims: layout.decode_dims(record.iter().skip(2))?,
            value: decode_opt_float(field(record, n + 2)?)?,
        })
    }
}

impl CsvCell for MicroCell {
    const KIND: TableKind = TableKind::Micro;

    fn to_record(&self, layout: &Layout) -> std::result::Result<Vec<String>, String> {
        if self.attrs.len() != layout.values.len() {
            return Err(format!(
                "expected {} attributes, found {}",
                layout.values.len(),
                self.attrs.len()
            ));
        }
        let mut rec = vec![self.key.to_string()];
        for (codec, value) in layout.values.iter().zip(&self.attrs) {
            rec.push(codec.encode_value(value, layout.labels, &layout.format)?);
        }
        Ok(rec)
    }

    fn from_record(record: &StringRecord, layout: &Layout) -> std::result::Result<Self, String> {
        check_width(record, layout)?;
        Ok(MicroCell {
            key: parse_int(field(record, 0)?)?,
            attrs: layout
                .values
                .iter()
                .zip(record.iter().skip(1))
                .map(|(codec, text)| codec.decode_value(text, layout.labels))
                .collect::<std::result::Result<_, _>>()?,
        })
    }
}

/// Encode cells as CSV bytes, header first.
pub fn encode<C: CsvCell>(layout: &Layout, cells: &[C], cfg: &CodecConfig) -> Result<Vec<u8>> {
    layout.expect_kind(C::KIND)?;
    let mut buf = Vec::new();
    if cfg.utf8_bom {
        buf.extend_from_slice(encoding::UTF8_BOM);
    }
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(buf);
    writer.write_record(&layout.header)?;
    for (i, cell) in cells.iter().enumerate() {
        let record = cell.to_record(layout).map_err(|reason| CopyError::InvalidRow {
            table: layout.name.clone(),
            row: i + 1,
            reason,
        })?;
        writer.write_record(&record)?;
    }
    writer.into_inner().map_err(|e| CopyError::Io(e.into_error()))
}

/// Decoded CSV text of one value table.
///
/// Each call to [`TableText::cells`] starts a new pass over the rows.
pub struct TableText<'a> {
    layout: &'a Layout,
    text: String,
}

impl<'a> TableText<'a> {
    pub fn new(layout: &'a Layout, bytes: &[u8], cfg: &CodecConfig) -> Result<Self> {
        Ok(Self {
            layout,
            text: encoding::decode_text(bytes, cfg.encoding)?,
        })
    }

    /// Check the header and return a lazy iterator over the data rows.
    pub fn cells<C: CsvCell>(&self) -> Result<Cells<'_, C>> {
        self.layout.expect_kind(C::KIND)?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(self.text.as_bytes());
        let actual = reader.headers()?;
        if !actual.iter().eq(self.layout.header.iter().map(String::as_str)) {
            return Err(CopyError::HeaderMismatch {
                table: self.layout.name.clone(),
                expected: self.layout.header.join(","),
                actual: actual.iter().collect::<Vec<_>>().join(","),
            });
        }
        Ok(Cells {
            records: reader.into_records(),
            layout: self.layout,
            row: 0,
            failed: false,
            _cell: PhantomData,
        })
    }

    /// Decode every row, failing without returning any cell if one row is bad.
    pub fn decode_all<C: CsvCell>(&self) -> Result<Vec<C>> {
        self.cells()?.collect()
    }
}

/// Lazy row iterator; stops after the first error.
pub struct Cells<'t, C> {
    records: csv::StringRecordsIntoIter<&'t [u8]>,
    layout: &'t Layout,
    row: usize,
    failed: bool,
    _cell: PhantomData<C>,
}

impl<C: CsvCell> Iterator for Cells<'_, C> {
    type Item = Result<C>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let record = self.records.next()?;
        self.row += 1;
        let cell = record
            .map_err(|e| e.to_string())
            .and_then(|r| C::from_record(&r, self.layout))
            .map_err(|reason| CopyError::InvalidRow {
                table: self.layout.name.clone(),
                row: self.row,
                reason,
            });
        self.failed = cell.is_err();
        Some(cell)
    }
}

/// Decode CSV bytes into cells.
pub fn decode<C: CsvCell>(layout: &Layout, bytes: &[u8], cfg: &CodecConfig) -> Result<Vec<C>> {
    TableText::new(layout, bytes, cfg)?.decode_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use model_store::{AccDef, AttrDef, ExprDef, TypeDef};

    fn item(id: i32, name: &str) -> EnumItem {
        EnumItem {
            id,
            name: name.to_string(),
        }
    }

    fn model() -> ModelDef {
        ModelDef {
            name: "modelOne".to_string(),
            digest: "d1".to_string(),
            version: String::new(),
            types: vec![
                TypeDef {
                    name: "SEX".to_string(),
                    kind: TypeKind::Enum {
                        items: vec![item(0, "F"), item(1, "M")],
                    },
                },
                TypeDef {
                    name: "AGE".to_string(),
                    kind: TypeKind::Enum {
                        items: vec![item(10, "10-20"), item(20, "20-30"), item(30, "30+")],
                    },
                },
            ],
            params: vec![
                ParamDef {
                    hid: 1,
                    name: "ageSex".to_string(),
                    digest: "p1".to_string(),
                    type_name: "double".to_string(),
                    dims: vec![
                        DimDef {
                            name: "dim0".to_string(),
                            type_name: "AGE".to_string(),
                            size: 3,
                        },
                        DimDef {
                            name: "dim1".to_string(),
                            type_name: "SEX".to_string(),
                            size: 2,
                        },
                    ],
                },
                ParamDef {
                    hid: 2,
                    name: "baseSex".to_string(),
                    digest: "p2".to_string(),
                    type_name: "SEX".to_string(),
                    dims: vec![],
                },
            ],
            tables: vec![TableDef {
                hid: 10,
                name: "salarySex".to_string(),
                digest: "t10".to_string(),
                dims: vec![
                    DimDef {
                        name: "dim0".to_string(),
                        type_name: "AGE".to_string(),
                        size: 3,
                    },
                    DimDef {
                        name: "dim1".to_string(),
                        type_name: "SEX".to_string(),
                        size: 2,
                    },
                ],
                accs: vec![AccDef {
                    acc_id: 0,
                    name: "acc0".to_string(),
                }],
                exprs: vec![
                    ExprDef {
                        expr_id: 0,
                        name: "expr0".to_string(),
                    },
                    ExprDef {
                        expr_id: 1,
                        name: "expr1".to_string(),
                    },
                ],
            }],
            entities: vec![EntityDef {
                hid: 20,
                name: "Person".to_string(),
                digest: "e20".to_string(),
                attrs: vec![
                    AttrDef {
                        attr_id: 0,
                        name: "sex".to_string(),
                        type_name: "SEX".to_string(),
                    },
                    AttrDef {
                        attr_id: 1,
                        name: "income".to_string(),
                        type_name: "double".to_string(),
                    },
                    AttrDef {
                        attr_id: 2,
                        name: "city".to_string(),
                        type_name: "string".to_string(),
                    },
                ],
            }],
        }
    }

    fn age_sex(values: &[Option<f64>]) -> Vec<ParamCell> {
        let mut cells = Vec::new();
        let mut i = 0;
        for age in [10, 20, 30] {
            for sex in [0, 1] {
                let value = match values.get(i).copied().flatten() {
                    Some(v) => CellValue::Float(v),
                    None => CellValue::Null,
                };
                cells.push(ParamCell {
                    sub_id: 0,
                    dims: vec![age, sex],
                    value,
                });
                i += 1;
            }
        }
        cells
    }

    #[test]
    fn test_all_numeric_parameter_round_trip() {
        let m = model();
        let cfg = CodecConfig::new();
        let layout = Layout::param(&m, &m.params[0], &cfg).unwrap();
        let cells = age_sex(&[Some(0.1), Some(1.0 / 3.0), Some(2.0), Some(-4.5), Some(1e-9), Some(7.0)]);

        let bytes = encode(&layout, &cells, &cfg).unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.starts_with("sub_id,dim0,dim1,param_value\n0,10-20,F,0.1\n"));

        let back: Vec<ParamCell> = decode(&layout, &bytes, &cfg).unwrap();
        assert_eq!(back, cells);
    }

    #[test]
    fn test_null_cell_round_trip() {
        let m = model();
        let cfg = CodecConfig::new();
        let layout = Layout::param(&m, &m.params[0], &cfg).unwrap();
        let cells = age_sex(&[Some(1.0), None, Some(3.0), Some(4.0), Some(5.0), Some(6.0)]);

        let bytes = encode(&layout, &cells, &cfg).unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains("0,10-20,M,NULL\n"));
        let back: Vec<ParamCell> = decode(&layout, &bytes, &cfg).unwrap();
        assert_eq!(back, cells);
        assert!(back[1].value.is_null());
    }

    #[test]
    fn test_empty_string_is_not_null() {
        let m = model();
        let cfg = CodecConfig::new();
        let layout = Layout::micro(&m, &m.entities[0], &cfg).unwrap();
        let cells = vec![
            MicroCell {
                key: 1,
                attrs: vec![CellValue::Int(1), CellValue::Float(10.5), CellValue::Str(String::new())],
            },
            MicroCell {
                key: 2,
                attrs: vec![CellValue::Int(0), CellValue::Null, CellValue::Null],
            },
        ];
        let bytes = encode(&layout, &cells, &cfg).unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert_eq!(text, "key,sex,income,city\n1,M,10.5,\n2,F,NULL,NULL\n");

        let back: Vec<MicroCell> = decode(&layout, &bytes, &cfg).unwrap();
        assert_eq!(back, cells);
    }

    #[test]
    fn test_string_null_token_reads_as_null() {
        let m = model();
        let cfg = CodecConfig::new();
        let layout = Layout::micro(&m, &m.entities[0], &cfg).unwrap();
        let cells = vec![MicroCell {
            key: 1,
            attrs: vec![CellValue::Int(1), CellValue::Float(1.0), CellValue::Str("NULL".to_string())],
        }];
        let bytes = encode(&layout, &cells, &cfg).unwrap();
        assert_eq!(String::from_utf8(bytes.clone()).unwrap(), "key,sex,income,city\n1,M,1,NULL\n");

        let back: Vec<MicroCell> = decode(&layout, &bytes, &cfg).unwrap();
        assert!(back[0].attrs[2].is_null());
    }

    #[test]
    fn test_two_dimensional_expression_table() {
        let m = model();
        let cfg = CodecConfig::new().with_double_format("%.4g").unwrap();
        let layout = Layout::expr(&m, &m.tables[0], &cfg).unwrap();
        let mut cells = Vec::new();
        for expr_id in [0, 1] {
            for age in [10, 20, 30] {
                for sex in [0, 1] {
                    cells.push(ExprCell {
                        expr_id,
                        dims: vec![age, sex],
                        value: Some(f64::from(age + sex) / 4.0),
                    });
                }
            }
        }
        cells[3].value = None;

        let bytes = encode(&layout, &cells, &cfg).unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.starts_with("expr_name,dim0,dim1,expr_value\nexpr0,10-20,F,2.5\n"));

        let back: Vec<ExprCell> = decode(&layout, &bytes, &cfg).unwrap();
        assert_eq!(back, cells);
    }

    #[test]
    fn test_id_mode_and_label_mode() {
        let m = model();
        let labels = CodecConfig::new();
        let ids = CodecConfig::new().with_id_csv(true);
        let table = &m.tables[0];
        let cells = vec![AccCell {
            acc_id: 0,
            sub_id: 3,
            dims: vec![30, 1],
            value: Some(12.25),
        }];

        let by_id = Layout::acc(&m, table, &ids).unwrap();
        let id_bytes = encode(&by_id, &cells, &ids).unwrap();
        assert_eq!(
            String::from_utf8(id_bytes.clone()).unwrap(),
            "acc_id,sub_id,dim0,dim1,acc_value\n0,3,30,1,12.25\n"
        );

        let by_name = Layout::acc(&m, table, &labels).unwrap();
        let name_bytes = encode(&by_name, &cells, &labels).unwrap();
        assert_eq!(
            String::from_utf8(name_bytes.clone()).unwrap(),
            "acc_name,sub_id,dim0,dim1,acc_value\nacc0,3,30+,M,12.25\n"
        );

        assert_eq!(decode::<AccCell>(&by_id, &id_bytes, &ids).unwrap(), cells);
        assert_eq!(decode::<AccCell>(&by_name, &name_bytes, &labels).unwrap(), cells);

        // decode only supports the configured mode
        let err = decode::<AccCell>(&by_name, &id_bytes, &labels).unwrap_err();
        assert!(matches!(err, CopyError::HeaderMismatch { .. }));
    }

    #[test]
    fn test_enum_value_parameter() {
        let m = model();
        let cfg = CodecConfig::new();
        let layout = Layout::param(&m, &m.params[1], &cfg).unwrap();
        let cells = vec![ParamCell {
            sub_id: 0,
            dims: vec![],
            value: CellValue::Int(1),
        }];
        let bytes = encode(&layout, &cells, &cfg).unwrap();
        assert_eq!(String::from_utf8_lossy(&bytes), "sub_id,param_value\n0,M\n");
        assert_eq!(decode::<ParamCell>(&layout, &bytes, &cfg).unwrap(), cells);
    }

    #[test]
    fn test_header_mismatch_rejected() {
        let m = model();
        let cfg = CodecConfig::new();
        let layout = Layout::param(&m, &m.params[0], &cfg).unwrap();
        let text = b"sub_id,dim1,dim0,param_value\n0,F,10-20,1\n";

        let err = decode::<ParamCell>(&layout, text, &cfg).unwrap_err();
        match err {
            CopyError::HeaderMismatch {
                table,
                expected,
                actual,
            } => {
                assert_eq!(table, "ageSex");
                assert_eq!(expected, "sub_id,dim0,dim1,param_value");
                assert_eq!(actual, "sub_id,dim1,dim0,param_value");
            }
            other => panic!("expected HeaderMismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_row_reports_row_index() {
        let m = model();
        let cfg = CodecConfig::new();
        let layout = Layout::param(&m, &m.params[0], &cfg).unwrap();
        let text = b"sub_id,dim0,dim1,param_value\n0,10-20,F,1\n0,10-20,M,oops\n0,20-30,F,3\n";

        let err = decode::<ParamCell>(&layout, text, &cfg).unwrap_err();
        assert!(matches!(err, CopyError::InvalidRow { row: 2, .. }));

        let short = b"sub_id,dim0,dim1,param_value\n0,10-20,F,1\n0,10-20\n";
        let err = decode::<ParamCell>(&layout, short, &cfg).unwrap_err();
        assert!(matches!(err, CopyError::InvalidRow { row: 2, .. }));
    }

    #[test]
    fn test_cells_iterator_is_restartable_and_stops_on_error() {
        let m = model();
        let cfg = CodecConfig::new();
        let layout = Layout::param(&m, &m.params[0], &cfg).unwrap();
        let text = b"sub_id,dim0,dim1,param_value\n0,10-20,F,1\n0,10-20,X,2\n0,20-30,F,3\n";
        let table = TableText::new(&layout, text, &cfg).unwrap();

        let first: Vec<_> = table.cells::<ParamCell>().unwrap().collect();
        assert_eq!(first.len(), 2);
        assert!(first[0].is_ok());
        assert!(first[1].is_err());

        let again = table.cells::<ParamCell>().unwrap().next().unwrap().unwrap();
        assert_eq!(again.dims, vec![10, 0]);
    }

    #[test]
    fn test_bom_output_and_input() {
        let m = model();
        let cfg = CodecConfig::new().with_utf8_bom(true);
        let layout = Layout::param(&m, &m.params[1], &cfg).unwrap();
        let cells = vec![ParamCell {
            sub_id: 0,
            dims: vec![],
            value: CellValue::Int(0),
        }];
        let bytes = encode(&layout, &cells, &cfg).unwrap();
        assert!(bytes.starts_with(encoding::UTF8_BOM));
        assert_eq!(decode::<ParamCell>(&layout, &bytes, &cfg).unwrap(), cells);
    }

    #[test]
    fn test_wrong_cell_kind_rejected() {
        let m = model();
        let cfg = CodecConfig::new();
        let layout = Layout::param(&m, &m.params[0], &cfg).unwrap();
        let err = encode::<ExprCell>(&layout, &[], &cfg).unwrap_err();
        assert!(matches!(err, CopyError::SchemaMismatch(_)));
    }
}
