//! SQL query builder for search.
//!
//! Translates search constraints into conditions on the outer `resources`
//! row. Each constraint becomes `logical_id [NOT] IN (subquery)` against one
//! index table (or the link table for references); values of one constraint
//! are ORed inside the subquery and constraints are ANDed.
//!
//! Placeholders are positional (`?`); parameters are stored in the order
//! their placeholders appear in the SQL text.

use rusqlite::ToSql;
use rusqlite::types::ToSqlOutput;
use rust_decimal::Decimal;

use crate::error::{SearchError, SearchResult};
use crate::references::ParsedReference;
use crate::registry::{ResourceTypeRegistry, SearchParameterDefinition};
use crate::search::normalize::{
    DateRange, approximate_range, canonicalize_quantity, decimal_to_f64, implicit_range,
    normalize_string, parse_decimal,
};
use crate::types::{SearchModifier, SearchParamType, SearchParameter, SearchPrefix, SearchValue};

/// Kilometres per degree of latitude.
const KM_PER_DEGREE: f64 = 111.32;
const KM_PER_MILE: f64 = 1.609344;

/// A fragment of SQL with bound parameters.
#[derive(Debug, Clone, Default)]
pub struct SqlFragment {
    /// The SQL clause.
    pub sql: String,
    /// Bound parameter values.
    pub params: Vec<SqlParam>,
}

/// A bound SQL parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    /// String parameter.
    String(String),
    /// Integer parameter.
    Integer(i64),
    /// Float parameter.
    Float(f64),
}

impl SqlParam {
    /// Creates a string parameter.
    pub fn string(s: impl Into<String>) -> Self {
        SqlParam::String(s.into())
    }

    /// Creates an integer parameter.
    pub fn integer(i: i64) -> Self {
        SqlParam::Integer(i)
    }

    /// Creates a float parameter.
    pub fn float(f: f64) -> Self {
        SqlParam::Float(f)
    }
}

impl ToSql for SqlParam {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            SqlParam::String(s) => s.to_sql(),
            SqlParam::Integer(i) => i.to_sql(),
            SqlParam::Float(f) => f.to_sql(),
        }
    }
}

impl SqlFragment {
    /// Creates a fragment with parameters.
    pub fn with_params(sql: impl Into<String>, params: Vec<SqlParam>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// Combines with another fragment using AND.
    pub fn and(mut self, other: SqlFragment) -> Self {
        if !self.sql.is_empty() && !other.sql.is_empty() {
            self.sql = format!("({}) AND ({})", self.sql, other.sql);
        } else if !other.sql.is_empty() {
            self.sql = other.sql;
        }
        self.params.extend(other.params);
        self
    }

    /// Combines with another fragment using OR.
    pub fn or(mut self, other: SqlFragment) -> Self {
        if !self.sql.is_empty() && !other.sql.is_empty() {
            self.sql = format!("({}) OR ({})", self.sql, other.sql);
        } else if !other.sql.is_empty() {
            self.sql = other.sql;
        }
        self.params.extend(other.params);
        self
    }

    /// Wraps the fragment in `NOT (...)`.
    pub fn negate(mut self) -> Self {
        self.sql = format!("NOT ({})", self.sql);
        self
    }
}

fn join_or(fragments: Vec<SqlFragment>) -> SqlFragment {
    fragments
        .into_iter()
        .fold(SqlFragment::default(), SqlFragment::or)
}

/// Escapes `LIKE` wildcards; patterns use `ESCAPE '\'`.
fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn invalid_value(parameter: &str, value: &str, message: impl Into<String>) -> SearchError {
    SearchError::InvalidValue {
        parameter: parameter.to_string(),
        value: value.to_string(),
        message: message.into(),
    }
}

/// Builds SQL conditions from search parameters.
pub struct QueryBuilder<'a> {
    registry: &'a ResourceTypeRegistry,
    /// The resource type being searched.
    resource_type: &'a str,
    /// Absolute URLs under this base are local references.
    base_url: Option<&'a str>,
}

impl<'a> QueryBuilder<'a> {
    /// Creates a new query builder.
    pub fn new(
        registry: &'a ResourceTypeRegistry,
        resource_type: &'a str,
        base_url: Option<&'a str>,
    ) -> Self {
        Self {
            registry,
            resource_type,
            base_url,
        }
    }

    /// Builds the AND of every parameter's condition.
    ///
    /// Returns an empty fragment when there are no parameters.
    pub fn build(&self, parameters: &[SearchParameter]) -> SearchResult<SqlFragment> {
        let mut combined = SqlFragment::default();
        for param in parameters {
            combined = combined.and(self.build_parameter_condition(param)?);
        }
        Ok(combined)
    }

    /// Builds a condition for a single search parameter.
    fn build_parameter_condition(&self, param: &SearchParameter) -> SearchResult<SqlFragment> {
        let definition = self
            .registry
            .search_param(self.resource_type, &param.name)
            .ok_or_else(|| SearchError::UnknownParameter {
                resource_type: self.resource_type.to_string(),
                parameter: param.name.clone(),
            })?;
        let param_type = definition.param_type;

        if let Some(modifier) = &param.modifier {
            if !modifier.is_valid_for(param_type) {
                return Err(SearchError::UnsupportedModifier {
                    modifier: modifier.to_string(),
                    param_type: param_type.to_string(),
                });
            }
        }

        if param.modifier == Some(SearchModifier::Missing) {
            return self.build_missing(param, &definition);
        }

        let values = self.normalize_values(param, param_type)?;
        let value_conditions = values
            .iter()
            .map(|value| self.build_value_condition(param, &definition, value))
            .collect::<SearchResult<Vec<_>>>()?;
        let matches = join_or(value_conditions);

        let negated = param.modifier == Some(SearchModifier::Not);
        Ok(self.membership(&definition, matches, negated))
    }

    /// Restores prefixes on types that do not compare by order and rejects
    /// prefixes the parameter type does not support.
    fn normalize_values(
        &self,
        param: &SearchParameter,
        param_type: SearchParamType,
    ) -> SearchResult<Vec<SearchValue>> {
        let ordered = matches!(
            param_type,
            SearchParamType::Number | SearchParamType::Date | SearchParamType::Quantity
        );

        let mut values = Vec::with_capacity(param.values.len());
        for value in &param.values {
            if value.value.is_empty() {
                return Err(invalid_value(&param.name, "", "empty search value"));
            }
            if !ordered {
                values.push(SearchValue::eq(value.as_written()));
            } else if value.prefix.is_valid_for(param_type) {
                values.push(value.clone());
            } else {
                return Err(SearchError::UnsupportedPrefix {
                    prefix: value.prefix.to_string(),
                    param_type: param_type.to_string(),
                });
            }
        }
        Ok(values)
    }

    /// Wraps value matches in `logical_id [NOT] IN (...)` over the table the
    /// parameter type is indexed in.
    fn membership(
        &self,
        definition: &SearchParameterDefinition,
        matches: SqlFragment,
        negated: bool,
    ) -> SqlFragment {
        let operator = if negated { "NOT IN" } else { "IN" };

        if definition.param_type == SearchParamType::Reference {
            let (paths_sql, mut params) = self.link_paths(definition);
            params.extend(matches.params);
            return SqlFragment::with_params(
                format!(
                    "logical_id {} (SELECT source_id FROM resource_links \
                     WHERE source_type = ? AND source_path IN ({}) AND ({}))",
                    operator, paths_sql, matches.sql
                ),
                params,
            );
        }

        let mut params = vec![
            SqlParam::string(self.resource_type),
            SqlParam::string(&definition.code),
        ];
        params.extend(matches.params);
        SqlFragment::with_params(
            format!(
                "logical_id {} (SELECT logical_id FROM {} \
                 WHERE resource_type = ? AND param_name = ? AND ({}))",
                operator,
                index_table(definition.param_type),
                matches.sql
            ),
            params,
        )
    }

    /// `name:missing=true|false`
    fn build_missing(
        &self,
        param: &SearchParameter,
        definition: &SearchParameterDefinition,
    ) -> SearchResult<SqlFragment> {
        let missing = match param.values.first().map(|v| v.value.as_str()) {
            Some("true") => true,
            Some("false") => false,
            other => {
                return Err(invalid_value(
                    &param.name,
                    other.unwrap_or(""),
                    "expected true or false",
                ));
            }
        };

        let operator = if missing { "NOT IN" } else { "IN" };
        if definition.param_type == SearchParamType::Reference {
            let (paths_sql, params) = self.link_paths(definition);
            return Ok(SqlFragment::with_params(
                format!(
                    "logical_id {} (SELECT source_id FROM resource_links \
                     WHERE source_type = ? AND source_path IN ({}))",
                    operator, paths_sql
                ),
                params,
            ));
        }

        Ok(SqlFragment::with_params(
            format!(
                "logical_id {} (SELECT logical_id FROM {} \
                 WHERE resource_type = ? AND param_name = ?)",
                operator,
                index_table(definition.param_type)
            ),
            vec![
                SqlParam::string(self.resource_type),
                SqlParam::string(&definition.code),
            ],
        ))
    }

    /// Placeholders and parameters for the link paths of a reference
    /// parameter, starting with the source type.
    fn link_paths(&self, definition: &SearchParameterDefinition) -> (String, Vec<SqlParam>) {
        let mut params = vec![SqlParam::string(self.resource_type)];
        let mut placeholders = Vec::new();
        for path in definition.paths() {
            params.push(SqlParam::string(link_path(path)));
            placeholders.push("?");
        }
        if placeholders.is_empty() {
            placeholders.push("NULL");
        }
        (placeholders.join(", "), params)
    }

    fn build_value_condition(
        &self,
        param: &SearchParameter,
        definition: &SearchParameterDefinition,
        value: &SearchValue,
    ) -> SearchResult<SqlFragment> {
        match definition.param_type {
            SearchParamType::String => Ok(build_string(param.modifier.as_ref(), &value.value)),
            SearchParamType::Token => Ok(build_token(param.modifier.as_ref(), &value.value)),
            SearchParamType::Number => build_number(&param.name, value),
            SearchParamType::Quantity => build_quantity(&param.name, value),
            SearchParamType::Date => build_date(&param.name, value),
            SearchParamType::Uri => Ok(build_uri(param.modifier.as_ref(), &value.value)),
            SearchParamType::Reference => {
                self.build_reference(param, definition, &value.value)
            }
            SearchParamType::Special => build_near(&param.name, &value.value),
        }
    }

    fn build_reference(
        &self,
        param: &SearchParameter,
        definition: &SearchParameterDefinition,
        value: &str,
    ) -> SearchResult<SqlFragment> {
        let type_modifier = match &param.modifier {
            Some(SearchModifier::Type(t)) => Some(t.as_str()),
            _ => None,
        };

        // A bare id takes its type from the modifier or a single target type
        if !value.contains('/') && !value.contains(':') {
            let single_target = definition
                .target
                .as_deref()
                .filter(|targets| targets.len() == 1)
                .map(|targets| targets[0].as_str());
            return Ok(match type_modifier.or(single_target) {
                Some(target_type) => local_reference(target_type, value, value),
                None => SqlFragment::with_params(
                    "target_id = ? OR target_id IN \
                     (SELECT logical_id FROM forced_ids WHERE forced_id = ?)",
                    vec![SqlParam::string(value), SqlParam::string(value)],
                ),
            });
        }

        match ParsedReference::parse(value, self.base_url) {
            ParsedReference::Local { resource_type, id } => {
                if type_modifier.is_some_and(|t| t != resource_type) {
                    return Err(invalid_value(
                        &param.name,
                        value,
                        format!("reference type does not match :{}", type_modifier.unwrap_or("")),
                    ));
                }
                Ok(local_reference(&resource_type, &id, value))
            }
            ParsedReference::External(uri) => Ok(SqlFragment::with_params(
                "target_uri = ?",
                vec![SqlParam::string(uri)],
            )),
        }
    }
}

/// The index table a parameter type is stored in.
fn index_table(param_type: SearchParamType) -> &'static str {
    match param_type {
        SearchParamType::String => "idx_string",
        SearchParamType::Token => "idx_token",
        SearchParamType::Number => "idx_number",
        SearchParamType::Quantity => "idx_quantity",
        SearchParamType::Date => "idx_date",
        SearchParamType::Uri => "idx_uri",
        SearchParamType::Special => "idx_coords",
        SearchParamType::Reference => "resource_links",
    }
}

/// The link path recorded for a parameter path: segments from the first
/// function call onwards are dropped.
fn link_path(path: &str) -> String {
    path.split('.')
        .take_while(|segment| !segment.contains('('))
        .collect::<Vec<_>>()
        .join(".")
}

fn local_reference(target_type: &str, id: &str, as_written: &str) -> SqlFragment {
    SqlFragment::with_params(
        "target_type = ? AND (target_id = ? OR target_id IN \
         (SELECT logical_id FROM forced_ids WHERE resource_type = ? AND forced_id = ?) \
         OR target_uri = ?)",
        vec![
            SqlParam::string(target_type),
            SqlParam::string(id),
            SqlParam::string(target_type),
            SqlParam::string(id),
            SqlParam::string(as_written),
        ],
    )
}

fn build_string(modifier: Option<&SearchModifier>, value: &str) -> SqlFragment {
    match modifier {
        Some(SearchModifier::Exact) => {
            SqlFragment::with_params("value_exact = ?", vec![SqlParam::string(value)])
        }
        Some(SearchModifier::Contains) => SqlFragment::with_params(
            "value_normalized LIKE ? ESCAPE '\\'",
            vec![SqlParam::string(format!(
                "%{}%",
                escape_like(&normalize_string(value))
            ))],
        ),
        _ => SqlFragment::with_params(
            "value_normalized LIKE ? ESCAPE '\\'",
            vec![SqlParam::string(format!(
                "{}%",
                escape_like(&normalize_string(value))
            ))],
        ),
    }
}

fn build_token(modifier: Option<&SearchModifier>, value: &str) -> SqlFragment {
    if modifier == Some(&SearchModifier::Text) {
        return SqlFragment::with_params(
            "display LIKE ? ESCAPE '\\'",
            vec![SqlParam::string(format!("%{}%", escape_like(value)))],
        );
    }

    match value.split_once('|') {
        Some(("", code)) => {
            SqlFragment::with_params("system IS NULL AND code = ?", vec![SqlParam::string(code)])
        }
        Some((system, "")) => {
            SqlFragment::with_params("system = ?", vec![SqlParam::string(system)])
        }
        Some((system, code)) => SqlFragment::with_params(
            "system = ? AND code = ?",
            vec![SqlParam::string(system), SqlParam::string(code)],
        ),
        None => SqlFragment::with_params("code = ?", vec![SqlParam::string(value)]),
    }
}

fn out_of_range(parameter: &str, value: Decimal) -> SearchError {
    invalid_value(parameter, &value.to_string(), "number out of range")
}

fn decimal_param(parameter: &str, value: Decimal) -> SearchResult<SqlParam> {
    decimal_to_f64(value)
        .map(SqlParam::float)
        .ok_or_else(|| out_of_range(parameter, value))
}

/// Compares a numeric column against a prefixed search value.
fn compare_decimal(
    parameter: &str,
    column: &str,
    prefix: SearchPrefix,
    value: Decimal,
) -> SearchResult<SqlFragment> {
    let fragment = match prefix {
        SearchPrefix::Eq | SearchPrefix::Ne => {
            let (lo, hi) = implicit_range(value).ok_or_else(|| out_of_range(parameter, value))?;
            let eq = SqlFragment::with_params(
                format!("{col} >= ? AND {col} < ?", col = column),
                vec![decimal_param(parameter, lo)?, decimal_param(parameter, hi)?],
            );
            if prefix == SearchPrefix::Ne { eq.negate() } else { eq }
        }
        SearchPrefix::Ap => {
            let (lo, hi) =
                approximate_range(value).ok_or_else(|| out_of_range(parameter, value))?;
            SqlFragment::with_params(
                format!("{col} >= ? AND {col} <= ?", col = column),
                vec![decimal_param(parameter, lo)?, decimal_param(parameter, hi)?],
            )
        }
        SearchPrefix::Gt | SearchPrefix::Sa => SqlFragment::with_params(
            format!("{} > ?", column),
            vec![decimal_param(parameter, value)?],
        ),
        SearchPrefix::Lt | SearchPrefix::Eb => SqlFragment::with_params(
            format!("{} < ?", column),
            vec![decimal_param(parameter, value)?],
        ),
        SearchPrefix::Ge => SqlFragment::with_params(
            format!("{} >= ?", column),
            vec![decimal_param(parameter, value)?],
        ),
        SearchPrefix::Le => SqlFragment::with_params(
            format!("{} <= ?", column),
            vec![decimal_param(parameter, value)?],
        ),
    };
    Ok(fragment)
}

fn build_number(parameter: &str, value: &SearchValue) -> SearchResult<SqlFragment> {
    let number = parse_decimal(&value.value)
        .ok_or_else(|| invalid_value(parameter, &value.value, "expected a number"))?;
    compare_decimal(parameter, "value", value.prefix, number)
}

/// `value|system|code`; system and code are optional.
fn build_quantity(parameter: &str, value: &SearchValue) -> SearchResult<SqlFragment> {
    let mut parts = value.value.splitn(3, '|');
    let number = parts.next().unwrap_or("");
    let system = parts.next().filter(|s| !s.is_empty());
    let code = parts.next().filter(|s| !s.is_empty());

    let number = parse_decimal(number)
        .ok_or_else(|| invalid_value(parameter, &value.value, "expected value|system|code"))?;

    if let Some((canonical, unit)) = canonicalize_quantity(number, system, code) {
        // Scale the bounds of the search value, not just its magnitude.
        let scale = if number.is_zero() {
            Decimal::ONE
        } else {
            canonical
                .checked_div(number)
                .ok_or_else(|| out_of_range(parameter, number))?
        };
        let compared = compare_scaled(parameter, value.prefix, number, scale)?;
        return Ok(compared.and(SqlFragment::with_params(
            "canonical_code = ?",
            vec![SqlParam::string(unit)],
        )));
    }

    let mut fragment = compare_decimal(parameter, "value", value.prefix, number)?;
    if let Some(system) = system {
        fragment = fragment.and(SqlFragment::with_params(
            "system = ?",
            vec![SqlParam::string(system)],
        ));
    }
    if let Some(code) = code {
        fragment = fragment.and(SqlFragment::with_params(
            "(code = ? OR unit = ?)",
            vec![SqlParam::string(code), SqlParam::string(code)],
        ));
    }
    Ok(fragment)
}

/// Like [`compare_decimal`] on `canonical_value`, with every bound computed
/// in the search unit and then scaled to the canonical unit.
fn compare_scaled(
    parameter: &str,
    prefix: SearchPrefix,
    value: Decimal,
    scale: Decimal,
) -> SearchResult<SqlFragment> {
    let scaled = |d: Decimal| {
        let canonical = d
            .checked_mul(scale)
            .ok_or_else(|| out_of_range(parameter, d))?;
        decimal_param(parameter, canonical)
    };
    let column = "canonical_value";

    let fragment = match prefix {
        SearchPrefix::Eq | SearchPrefix::Ne => {
            let (lo, hi) = implicit_range(value).ok_or_else(|| out_of_range(parameter, value))?;
            let eq = SqlFragment::with_params(
                format!("{col} >= ? AND {col} < ?", col = column),
                vec![scaled(lo)?, scaled(hi)?],
            );
            if prefix == SearchPrefix::Ne { eq.negate() } else { eq }
        }
        SearchPrefix::Ap => {
            let (lo, hi) =
                approximate_range(value).ok_or_else(|| out_of_range(parameter, value))?;
            SqlFragment::with_params(
                format!("{col} >= ? AND {col} <= ?", col = column),
                vec![scaled(lo)?, scaled(hi)?],
            )
        }
        SearchPrefix::Gt | SearchPrefix::Sa => {
            SqlFragment::with_params(format!("{} > ?", column), vec![scaled(value)?])
        }
        SearchPrefix::Lt | SearchPrefix::Eb => {
            SqlFragment::with_params(format!("{} < ?", column), vec![scaled(value)?])
        }
        SearchPrefix::Ge => {
            SqlFragment::with_params(format!("{} >= ?", column), vec![scaled(value)?])
        }
        SearchPrefix::Le => {
            SqlFragment::with_params(format!("{} <= ?", column), vec![scaled(value)?])
        }
    };
    Ok(fragment)
}

fn build_date(parameter: &str, value: &SearchValue) -> SearchResult<SqlFragment> {
    let range = DateRange::parse(&value.value)
        .ok_or_else(|| invalid_value(parameter, &value.value, "expected a date"))?;
    let (start, end) = (
        SqlParam::integer(range.start_ms),
        SqlParam::integer(range.end_ms),
    );

    let eq = || {
        SqlFragment::with_params(
            "start_ms >= ? AND end_ms <= ?",
            vec![start.clone(), end.clone()],
        )
    };
    let gt = || SqlFragment::with_params("end_ms > ?", vec![end.clone()]);
    let lt = || SqlFragment::with_params("start_ms < ?", vec![start.clone()]);

    Ok(match value.prefix {
        SearchPrefix::Eq => eq(),
        SearchPrefix::Ne => eq().negate(),
        SearchPrefix::Gt => gt(),
        SearchPrefix::Lt => lt(),
        SearchPrefix::Ge => gt().or(eq()),
        SearchPrefix::Le => lt().or(eq()),
        SearchPrefix::Sa => SqlFragment::with_params("start_ms > ?", vec![end.clone()]),
        SearchPrefix::Eb => SqlFragment::with_params("end_ms < ?", vec![start.clone()]),
        SearchPrefix::Ap => SqlFragment::with_params(
            "start_ms <= ? AND end_ms >= ?",
            vec![end.clone(), start.clone()],
        ),
    })
}

fn build_uri(modifier: Option<&SearchModifier>, value: &str) -> SqlFragment {
    match modifier {
        Some(SearchModifier::Below) => SqlFragment::with_params(
            "value LIKE ? ESCAPE '\\'",
            vec![SqlParam::string(format!("{}%", escape_like(value)))],
        ),
        Some(SearchModifier::Above) => SqlFragment::with_params(
            "substr(?, 1, length(value)) = value",
            vec![SqlParam::string(value)],
        ),
        _ => SqlFragment::with_params("value = ?", vec![SqlParam::string(value)]),
    }
}

/// `lat|long|distance|units`, distance in km unless units is `mi`.
fn build_near(parameter: &str, value: &str) -> SearchResult<SqlFragment> {
    let parts: Vec<&str> = value.split('|').collect();
    let number = |i: usize| -> SearchResult<Option<f64>> {
        match parts.get(i).filter(|p| !p.is_empty()) {
            Some(p) => p
                .parse::<f64>()
                .map(Some)
                .map_err(|_| invalid_value(parameter, value, "expected lat|long|distance|units")),
            None => Ok(None),
        }
    };

    let (Some(latitude), Some(longitude)) = (number(0)?, number(1)?) else {
        return Err(invalid_value(parameter, value, "expected lat|long|distance|units"));
    };
    let distance = number(2)?.unwrap_or(1.0);
    let distance_km = match parts.get(3).copied() {
        None | Some("") | Some("km") => distance,
        Some("mi") | Some("[mi_i]") => distance * KM_PER_MILE,
        Some("m") => distance / 1000.0,
        Some(other) => {
            return Err(invalid_value(
                parameter,
                value,
                format!("unsupported distance unit '{}'", other),
            ));
        }
    };

    let delta_lat = distance_km / KM_PER_DEGREE;
    let delta_lon = distance_km / (KM_PER_DEGREE * latitude.to_radians().cos().abs().max(1e-6));

    Ok(SqlFragment::with_params(
        "latitude BETWEEN ? AND ? AND longitude BETWEEN ? AND ?",
        vec![
            SqlParam::float(latitude - delta_lat),
            SqlParam::float(latitude + delta_lat),
            SqlParam::float(longitude - delta_lon),
            SqlParam::float(longitude + delta_lon),
        ],
    ))
}
