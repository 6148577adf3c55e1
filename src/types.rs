/// Distinct value of the stratification key.
/// Examples: `BROOKLYN`, `STATEN ISLAND`, `Unspecified`
pub type StratumValue = String;
/// Column name in a fetched table.
/// Examples: `unique_key`, `created_date`, `borough`
pub type ColumnName = String;
/// Raw, untyped cell value as delivered by the remote CSV body.
/// Examples: `59893213`, `2024-01-03T11:42:07.000`, `` (missing)
pub type FieldValue = String;
/// SoQL query parameter name.
/// Examples: `$select`, `$where`, `$limit`
pub type ParamName = String;
/// Warning/log message text.
/// Example: `stratum 'QUEENS' returned 0 of 120 planned rows`
pub type LogMessage = String;
