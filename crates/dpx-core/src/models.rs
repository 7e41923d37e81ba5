use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Value written to `min_date`/`max_date` when a table holds no dates.
pub const NO_DATE_FOUND: &str = "None";

/// Default CKAN `package_search` paging parameters.
pub const DEFAULT_OFFSET_PARAM: &str = "start";
pub const DEFAULT_LIMIT_PARAM: &str = "rows";

/// Builds a namespaced field name, e.g. `dpe:portal`.
pub fn namespaced(namespace: &str, field: &str) -> String {
    format!("{}:{}", namespace, field)
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// One external open-data catalog instance.
///
/// Loaded once at startup and shared by reference (`Arc<Portal>`) with every
/// request derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Portal {
    /// Identifier used as key in every per-portal result map.
    pub id: String,
    /// Base URL of the CKAN instance.
    pub base_url: String,
    /// Package field (and facet) holding the portal's themes.
    pub theme_facet_name: String,
    /// `package_search` parameter used for the page offset.
    pub offset_param: String,
    /// `package_search` parameter used for the page size.
    pub limit_param: String,
}

impl Portal {
    /// Creates a portal using CKAN's default paging parameters.
    pub fn new(id: impl Into<String>, base_url: impl Into<String>, themes: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            base_url: base_url.into(),
            theme_facet_name: themes.into(),
            offset_param: DEFAULT_OFFSET_PARAM.to_string(),
            limit_param: DEFAULT_LIMIT_PARAM.to_string(),
        }
    }

    /// Overrides the paging parameter names.
    pub fn with_paging_params(mut self, offset: impl Into<String>, limit: impl Into<String>) -> Self {
        self.offset_param = offset.into();
        self.limit_param = limit.into();
        self
    }
}

/// Facets the harvester knows how to aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacetKind {
    Tags,
    Themes,
}

impl FacetKind {
    /// Name used for the output dump and log lines.
    pub fn name(&self) -> &'static str {
        match self {
            FacetKind::Tags => "tags",
            FacetKind::Themes => "themes",
        }
    }

    /// Facet field to query on the given portal.
    pub fn field_for<'a>(&self, portal: &'a Portal) -> &'a str {
        match self {
            FacetKind::Tags => "tags",
            FacetKind::Themes => &portal.theme_facet_name,
        }
    }
}

/// One page of `package_search` to issue against a portal.
#[derive(Debug, Clone)]
pub struct PageRequest {
    pub portal: Arc<Portal>,
    pub namespace: Arc<str>,
    pub offset: u64,
    pub page_size: u64,
}

/// Identity of a [`PageRequest`] inside a batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageKey {
    pub portal_id: String,
    pub offset: u64,
}

impl fmt::Display for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (offset {})", self.portal_id, self.offset)
    }
}

impl PageRequest {
    pub fn key(&self) -> PageKey {
        PageKey {
            portal_id: self.portal.id.clone(),
            offset: self.offset,
        }
    }
}

/// A CKAN tag object attached to a package.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extras: Map<String, Value>,
}

/// A dataset record returned by a portal's search API.
///
/// Known fields are typed; every other field the portal returns (including
/// the namespaced `{ns}:portal` and `{ns}:themes` keys injected by the
/// harvester) lives in `extras`.
///
/// # Examples
///
/// ```
/// use dpx_core::models::Package;
///
/// let json = r#"{
///     "id": "pkg-1",
///     "name": "air-quality",
///     "isopen": true,
///     "tags": [{"display_name": "air"}, {"display_name": "health"}],
///     "theme-primary": "environment"
/// }"#;
///
/// let package: Package = serde_json::from_str(json).unwrap();
/// assert!(package.is_open());
/// assert_eq!(package.tags_summary(), "air,health");
/// assert!(package.extras.contains_key("theme-primary"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Package {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isopen: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<Tag>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub resources: Vec<Resource>,
    #[serde(flatten)]
    pub extras: Map<String, Value>,
}

impl Package {
    /// True only when the portal explicitly marks the package open.
    pub fn is_open(&self) -> bool {
        self.isopen == Some(true)
    }

    /// Organisation label: its title, else its name, else a plain string value.
    pub fn organisation(&self) -> String {
        match &self.organization {
            Some(Value::Object(org)) => org
                .get("title")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .or_else(|| org.get("name").and_then(Value::as_str))
                .unwrap_or_default()
                .to_string(),
            Some(Value::String(s)) => s.clone(),
            _ => String::new(),
        }
    }

    /// Comma-joined `display_name` of every tag, empty when untagged.
    pub fn tags_summary(&self) -> String {
        self.tags
            .iter()
            .filter_map(|t| t.display_name.as_deref())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Value of any field, typed or extra.
    pub fn field(&self, name: &str) -> Value {
        match name {
            "id" => Value::String(self.id.clone()),
            "name" => Value::String(self.name.clone()),
            "organization" => self.organization.clone().unwrap_or(Value::Null),
            _ => self.extras.get(name).cloned().unwrap_or(Value::Null),
        }
    }

    /// Origin portal id injected by [`Package::tag_origin`].
    pub fn portal_id(&self, namespace: &str) -> Option<&str> {
        self.extras
            .get(&namespaced(namespace, "portal"))
            .and_then(Value::as_str)
    }

    /// Namespaced themes injected by [`Package::tag_origin`].
    pub fn themes(&self, namespace: &str) -> Value {
        self.extras
            .get(&namespaced(namespace, "themes"))
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// Injects the origin portal id and the portal's themes field.
    pub fn tag_origin(&mut self, portal: &Portal, namespace: &str) {
        let themes = self.field(&portal.theme_facet_name);
        self.extras
            .insert(namespaced(namespace, "portal"), Value::String(portal.id.clone()));
        self.extras.insert(namespaced(namespace, "themes"), themes);
    }
}

/// One downloadable file belonging to a package.
///
/// The profiling fields are only present once the resource went through the
/// profiler; `headers`/`min_date`/`max_date` and `error_message`/`error_url`
/// are mutually exclusive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub format: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organisation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_url: Option<String>,
    #[serde(flatten)]
    pub extras: Map<String, Value>,
}

impl Resource {
    /// Creates a bare resource, mostly useful in tests and fakes.
    pub fn new(id: impl Into<String>, format: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            format: format.into(),
            url: url.into(),
            ..Default::default()
        }
    }
}

/// Broad payload family a resource format belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatFamily {
    /// Delimited text (CSV, TSV, ...).
    Text,
    /// Spreadsheets (XLS, XLSX, ODS).
    Excel,
}

/// Format names recognised as parsable, grouped by family.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataFormats {
    #[serde(default)]
    pub text: Vec<String>,
    #[serde(default)]
    pub excel: Vec<String>,
}

impl DataFormats {
    pub fn new<S: Into<String>>(text: impl IntoIterator<Item = S>, excel: impl IntoIterator<Item = S>) -> Self {
        Self {
            text: text.into_iter().map(Into::into).collect(),
            excel: excel.into_iter().map(Into::into).collect(),
        }
    }

    /// Family of a declared resource format, matched case-insensitively.
    ///
    /// Returns `None` when the format is not in the parsable set.
    pub fn family_of(&self, format: &str) -> Option<FormatFamily> {
        let format = format.trim();
        if self.text.iter().any(|f| f.eq_ignore_ascii_case(format)) {
            Some(FormatFamily::Text)
        } else if self.excel.iter().any(|f| f.eq_ignore_ascii_case(format)) {
            Some(FormatFamily::Excel)
        } else {
            None
        }
    }

    pub fn is_parsable(&self, format: &str) -> bool {
        self.family_of(format).is_some()
    }
}
