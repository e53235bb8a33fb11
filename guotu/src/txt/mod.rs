//! GuoTu TXT exchange format (国土资源部门 plot coordinate files).
//!
//! A file is a sequence of `[Section]` blocks. Two sections are mandatory:
//! `[属性描述]` with ten fixed metadata keys and `[地块坐标]` with the plot
//! data. Inside the coordinate section a line ending in `@` opens a feature
//! and carries its raw attribute values; every following line is one
//! coordinate record `pointNumber,ringNumber,Y,X` (Y first, by convention).
//! Polygons have no native representation: rings are numbered and the
//! reader reassembles them, first ring as shell, the rest as holes.

mod parser;
mod writer;

pub use parser::{parse_file, parse_str};
pub use writer::{write_file, write_string, TxtWriteOptions};

use crate::types::Field;

pub(crate) const ATTR_SECTION: &str = "[属性描述]";
pub(crate) const COORD_SECTION: &str = "[地块坐标]";

/// Default plot fields: name, alias
const DEFAULT_FIELDS: &[(&str, &str)] = &[
    ("JZDS", "界址点数"),
    ("DKMJ", "地块面积"),
    ("DKBH", "地块编号"),
    ("DKMC", "地块名称"),
    ("JLTXSX", "记录图形属性"),
    ("TFH", "图幅号"),
    ("DKYT", "地块用途"),
    ("DLBM", "地类编码"),
    ("TBLX", "图斑类型"),
    ("DL", "地类"),
    ("GZQ", "改造前平均质量等别"),
    ("GZH", "改造后平均质量等别"),
    ("BZ", "备注"),
];

/// The standard thirteen plot fields, all typed as strings
pub fn default_fields() -> Vec<Field> {
    DEFAULT_FIELDS
        .iter()
        .map(|(name, alias)| Field::string(*name, *alias))
        .collect()
}

/// Names of the standard plot fields, in file order
pub fn default_field_names() -> Vec<String> {
    DEFAULT_FIELDS.iter().map(|(name, _)| name.to_string()).collect()
}
