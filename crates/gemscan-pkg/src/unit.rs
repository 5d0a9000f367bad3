//! Discovery units, the records a scan emits.

use crate::manifest::ManifestRecord;
use crate::resolve::ResolvedDependency;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `Name` of the loose-script aggregate unit.
pub const AGGREGATE_NAME: &str = ".";

/// `Data.name` of the loose-script aggregate unit.
pub const AGGREGATE_DATA_NAME: &str = "rubyscripts";

/// Kind of a discovery unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitType {
    /// A gem described by a manifest.
    Rubygem,
    /// Loose scripts claimed by no manifest.
    Ruby,
}

impl UnitType {
    /// Returns the type as it appears in output.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rubygem => "rubygem",
            Self::Ruby => "ruby",
        }
    }
}

impl std::fmt::Display for UnitType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Downstream operations a unit supports. Always null.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ops {
    pub depresolve: Option<Value>,
    pub graph: Option<Value>,
}

/// One discovered gem or script aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DiscoveryUnit {
    pub name: String,
    pub version: Option<String>,
    #[serde(rename = "Type")]
    pub unit_type: UnitType,
    pub dir: String,
    pub licenses: Vec<String>,
    pub license: Option<String>,
    pub files: Vec<String>,
    pub dependencies: Vec<ResolvedDependency>,
    pub data: serde_json::Map<String, Value>,
    pub ops: Ops,
}

impl DiscoveryUnit {
    /// Build the unit for one manifest.
    ///
    /// `scripts` are the manifest's co-located scripts; the directory marker
    /// `.` is appended after them.
    #[must_use]
    pub fn from_manifest(
        record: &ManifestRecord,
        dir: String,
        scripts: Vec<String>,
        dependencies: Vec<ResolvedDependency>,
    ) -> Self {
        let mut files = scripts;
        files.push(String::from("."));

        Self {
            name: record.name.clone(),
            version: record.version.clone(),
            unit_type: UnitType::Rubygem,
            dir,
            licenses: record.licenses.clone(),
            license: record.license().map(str::to_string),
            files,
            data: record.data(&dependencies),
            dependencies,
            ops: Ops::default(),
        }
    }

    /// Build the aggregate unit for scripts no manifest claims.
    #[must_use]
    pub fn scripts(files: Vec<String>, dependencies: Vec<ResolvedDependency>) -> Self {
        let mut data = serde_json::Map::new();
        data.insert(String::from("name"), Value::from(AGGREGATE_DATA_NAME));
        data.insert(String::from("files"), Value::from(files.clone()));

        Self {
            name: String::from(AGGREGATE_NAME),
            version: None,
            unit_type: UnitType::Ruby,
            dir: String::from("."),
            licenses: Vec::new(),
            license: None,
            files,
            dependencies,
            data,
            ops: Ops::default(),
        }
    }

    /// Returns true if this is the loose-script aggregate.
    #[must_use]
    pub fn is_aggregate(&self) -> bool {
        self.unit_type == UnitType::Ruby
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gemspec::parse_gemspec;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn manifest_unit_shape() {
        let record = parse_gemspec(
            r#"
Gem::Specification.new do |s|
  s.name = 'a'
  s.version = '0.1.0'
  s.license = 'MIT'
end
"#,
        )
        .unwrap();
        let deps = vec![ResolvedDependency {
            name: String::from("b"),
            version: String::from(">= 1.0"),
            path: String::from("a.gemspec"),
        }];

        let scripts = vec![String::from("script.rb")];
        let unit = DiscoveryUnit::from_manifest(&record, String::from("."), scripts, deps);
        let json = serde_json::to_value(&unit).unwrap();

        assert_eq!(json["Name"], "a");
        assert_eq!(json["Version"], "0.1.0");
        assert_eq!(json["Type"], "rubygem");
        assert_eq!(json["Dir"], ".");
        assert_eq!(json["Licenses"], json!(["MIT"]));
        assert_eq!(json["License"], "MIT");
        assert_eq!(json["Files"], json!(["script.rb", "."]));
        assert_eq!(
            json["Dependencies"],
            json!([{"name": "b", "version": ">= 1.0", "path": "a.gemspec"}])
        );
        assert_eq!(json["Data"]["dependencies"], json["Dependencies"]);
        assert_eq!(json["Ops"], json!({"depresolve": null, "graph": null}));
    }

    #[test]
    fn aggregate_unit_shape() {
        let unit = DiscoveryUnit::scripts(vec![String::from("bin/tool.rb")], Vec::new());
        assert!(unit.is_aggregate());

        let json = serde_json::to_value(&unit).unwrap();
        assert_eq!(json["Name"], ".");
        assert_eq!(json["Type"], "ruby");
        assert_eq!(json["Version"], Value::Null);
        assert_eq!(json["License"], Value::Null);
        assert_eq!(json["Licenses"], json!([]));
        assert_eq!(
            json["Data"],
            json!({"name": "rubyscripts", "files": ["bin/tool.rb"]})
        );
    }

    #[test]
    fn key_order_is_fixed() {
        let unit = DiscoveryUnit::scripts(Vec::new(), Vec::new());
        let text = serde_json::to_string(&unit).unwrap();
        let keys = [
            "Name",
            "Version",
            "Type",
            "Dir",
            "Licenses",
            "License",
            "Files",
            "Dependencies",
            "Data",
            "Ops",
        ];
        let positions: Vec<usize> = keys
            .iter()
            .map(|k| text.find(&format!("\"{k}\":")).unwrap())
            .collect();
        let mut sorted = positions.clone();
        sorted.sort_unstable();
        assert_eq!(positions, sorted);
    }
}
