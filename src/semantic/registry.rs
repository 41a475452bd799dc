//! Semantic Registry Implementation
//!
//! Central registry for metrics, dimensions and the star schema they are
//! compiled against.

use crate::error::{PipelineError, Result};
use crate::semantic::dimension::{SemanticDimension, TimeGrain};
use crate::semantic::metric::{Aggregation, SemanticMetric};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Equi-join between the fact table and one dimension table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinKey {
    pub fact_column: String,
    pub dimension_column: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionTable {
    pub name: String,
    pub alias: String,
    pub join: JoinKey,
}

/// Physical layout behind the vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StarSchema {
    pub fact_table: String,
    pub fact_alias: String,
    /// Date column of the fact table that time windows filter on.
    pub date_column: String,
    /// Dimension table carrying the so/asm/zsm/nsm codes.
    pub hierarchy_table: String,
    /// Single denormalized table name used by the embedded store.
    pub embedded_table: String,
    /// Cube member of the date column, for `timeDimensions`.
    pub cube_time_member: String,
    /// Cube holding the hierarchy codes, e.g. `SalesHierarchy`.
    pub cube_hierarchy: String,
    pub dimension_tables: Vec<DimensionTable>,
}

impl StarSchema {
    pub fn dimension_table(&self, name: &str) -> Option<&DimensionTable> {
        self.dimension_tables.iter().find(|t| t.name == name)
    }
}

/// Semantic registry trait
pub trait SemanticRegistry: Send + Sync {
    fn metric(&self, name: &str) -> Option<&SemanticMetric>;
    fn dimension(&self, name: &str) -> Option<&SemanticDimension>;
    /// Metrics in registration order.
    fn metrics(&self) -> &[SemanticMetric];
    /// Dimensions in registration order.
    fn dimensions(&self) -> &[SemanticDimension];
    fn schema(&self) -> &StarSchema;
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    schema: StarSchema,
    metrics: Vec<SemanticMetric>,
    dimensions: Vec<SemanticDimension>,
}

/// In-memory semantic registry implementation
#[derive(Debug, Clone)]
pub struct InMemorySemanticRegistry {
    schema: StarSchema,
    metrics: Vec<SemanticMetric>,
    dimensions: Vec<SemanticDimension>,
    metric_index: HashMap<String, usize>,
    dimension_index: HashMap<String, usize>,
}

impl InMemorySemanticRegistry {
    pub fn new(schema: StarSchema) -> Self {
        Self {
            schema,
            metrics: Vec::new(),
            dimensions: Vec::new(),
            metric_index: HashMap::new(),
            dimension_index: HashMap::new(),
        }
    }

    pub fn register_metric(&mut self, metric: SemanticMetric) -> Result<()> {
        if self.metric_index.contains_key(&metric.name)
            || self.dimension_index.contains_key(&metric.name)
        {
            return Err(PipelineError::Config(format!(
                "identifier '{}' is registered twice",
                metric.name
            )));
        }
        self.metric_index.insert(metric.name.clone(), self.metrics.len());
        self.metrics.push(metric);
        Ok(())
    }

    pub fn register_dimension(&mut self, dimension: SemanticDimension) -> Result<()> {
        if self.metric_index.contains_key(&dimension.name)
            || self.dimension_index.contains_key(&dimension.name)
        {
            return Err(PipelineError::Config(format!(
                "identifier '{}' is registered twice",
                dimension.name
            )));
        }
        if dimension.table != self.schema.fact_table
            && self.schema.dimension_table(&dimension.table).is_none()
        {
            return Err(PipelineError::Config(format!(
                "dimension '{}' references unknown table '{}'",
                dimension.name, dimension.table
            )));
        }
        self.dimension_index
            .insert(dimension.name.clone(), self.dimensions.len());
        self.dimensions.push(dimension);
        Ok(())
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let file: RegistryFile = serde_json::from_str(raw)?;
        if file.schema.dimension_table(&file.schema.hierarchy_table).is_none() {
            return Err(PipelineError::Config(format!(
                "hierarchy table '{}' has no join definition",
                file.schema.hierarchy_table
            )));
        }
        let aliases: HashSet<&str> = file
            .schema
            .dimension_tables
            .iter()
            .map(|t| t.alias.as_str())
            .collect();
        if aliases.len() != file.schema.dimension_tables.len()
            || aliases.contains(file.schema.fact_alias.as_str())
        {
            return Err(PipelineError::Config("table aliases must be unique".to_string()));
        }

        let mut registry = Self::new(file.schema);
        for metric in file.metrics {
            registry.register_metric(metric)?;
        }
        for dimension in file.dimensions {
            registry.register_dimension(dimension)?;
        }
        Ok(registry)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Built-in CPG secondary-sales vocabulary.
    pub fn cpg_secondary_sales() -> Self {
        let schema = StarSchema {
            fact_table: "fact_secondary_sales".to_string(),
            fact_alias: "f".to_string(),
            date_column: "invoice_date".to_string(),
            hierarchy_table: "dim_sales_hierarchy".to_string(),
            embedded_table: "secondary_sales".to_string(),
            cube_time_member: "SecondarySales.invoiceDate".to_string(),
            cube_hierarchy: "SalesHierarchy".to_string(),
            dimension_tables: vec![
                dim_table("dim_product", "p", "product_key", "product_key"),
                dim_table("dim_geography", "g", "geography_key", "geography_key"),
                dim_table("dim_customer", "c", "customer_key", "customer_key"),
                dim_table("dim_channel", "ch", "channel_key", "channel_key"),
                dim_table("dim_sales_hierarchy", "sh", "sales_hierarchy_key", "hierarchy_key"),
            ],
        };

        let metrics = vec![
            SemanticMetric::new(
                "secondary_sales_value",
                "Net invoiced value after discounts",
                Aggregation::Sum,
                "net_value",
                "SecondarySales.netValue",
            ),
            SemanticMetric::new(
                "gross_sales_value",
                "Invoice value before discounts",
                Aggregation::Sum,
                "invoice_value",
                "SecondarySales.invoiceValue",
            ),
            SemanticMetric::new(
                "secondary_sales_volume",
                "Total units sold",
                Aggregation::Sum,
                "invoice_quantity",
                "SecondarySales.invoiceQuantity",
            ),
            SemanticMetric::new(
                "discount_amount",
                "Total discount given on invoices",
                Aggregation::Sum,
                "discount_amount",
                "SecondarySales.discountAmount",
            ),
            SemanticMetric::new(
                "discount_percentage",
                "Average discount rate on invoices",
                Aggregation::Avg,
                "discount_percentage",
                "SecondarySales.discountPercentage",
            ),
            SemanticMetric::new(
                "margin_amount",
                "Gross margin earned",
                Aggregation::Sum,
                "margin_amount",
                "SecondarySales.marginAmount",
            ),
            SemanticMetric::new(
                "margin_percentage",
                "Average margin rate",
                Aggregation::Avg,
                "margin_percentage",
                "SecondarySales.marginPercentage",
            ),
            SemanticMetric::new(
                "invoice_count",
                "Number of distinct invoices",
                Aggregation::CountDistinct,
                "invoice_number",
                "SecondarySales.invoiceCount",
            ),
            SemanticMetric::new(
                "average_invoice_value",
                "Average net value per invoice line",
                Aggregation::Avg,
                "net_value",
                "SecondarySales.averageInvoiceValue",
            ),
        ];

        let dimensions = vec![
            SemanticDimension::new("brand", "Product brand", "dim_product", "brand_name", "Product.brandName"),
            SemanticDimension::new("category", "Product category", "dim_product", "category_name", "Product.categoryName"),
            SemanticDimension::new("sku", "Stock keeping unit", "dim_product", "sku_name", "Product.skuName"),
            SemanticDimension::new("state", "Geographic state", "dim_geography", "state_name", "Geography.stateName"),
            SemanticDimension::new("district", "District within a state", "dim_geography", "district_name", "Geography.districtName"),
            SemanticDimension::new("town", "Town within a district", "dim_geography", "town_name", "Geography.townName"),
            SemanticDimension::new("distributor", "Distributor billing the retailer", "dim_customer", "distributor_name", "Customer.distributorName"),
            SemanticDimension::new("retailer", "Retail outlet", "dim_customer", "retailer_name", "Customer.retailerName"),
            SemanticDimension::new("outlet_type", "Outlet format", "dim_customer", "outlet_type", "Customer.outletType"),
            SemanticDimension::new("channel", "Sales channel", "dim_channel", "channel_name", "Channel.channelName"),
            SemanticDimension::new("zone", "Sales zone", "dim_sales_hierarchy", "zone_name", "SalesHierarchy.zoneName"),
            SemanticDimension::new("region", "Sales region", "dim_sales_hierarchy", "region_name", "SalesHierarchy.regionName"),
            SemanticDimension::new("week", "Invoice week", "fact_secondary_sales", "invoice_date", "SecondarySales.invoiceWeek")
                .with_time_grain(TimeGrain::Week),
            SemanticDimension::new("month", "Invoice month", "fact_secondary_sales", "invoice_date", "SecondarySales.invoiceMonth")
                .with_time_grain(TimeGrain::Month),
        ];

        let mut registry = Self::new(schema);
        // Built-in definitions are unique and reference declared tables.
        registry.metrics = metrics;
        registry.dimensions = dimensions;
        registry.metric_index = index(&registry.metrics, |m| &m.name);
        registry.dimension_index = index(&registry.dimensions, |d| &d.name);
        registry
    }
}

fn dim_table(name: &str, alias: &str, fact_column: &str, dimension_column: &str) -> DimensionTable {
    DimensionTable {
        name: name.to_string(),
        alias: alias.to_string(),
        join: JoinKey {
            fact_column: fact_column.to_string(),
            dimension_column: dimension_column.to_string(),
        },
    }
}

fn index<T>(items: &[T], name: impl Fn(&T) -> &String) -> HashMap<String, usize> {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| (name(item).clone(), i))
        .collect()
}

impl Default for InMemorySemanticRegistry {
    fn default() -> Self {
        Self::cpg_secondary_sales()
    }
}

impl SemanticRegistry for InMemorySemanticRegistry {
    fn metric(&self, name: &str) -> Option<&SemanticMetric> {
        self.metric_index.get(name).map(|&i| &self.metrics[i])
    }

    fn dimension(&self, name: &str) -> Option<&SemanticDimension> {
        self.dimension_index.get(name).map(|&i| &self.dimensions[i])
    }

    fn metrics(&self) -> &[SemanticMetric] {
        &self.metrics
    }

    fn dimensions(&self) -> &[SemanticDimension] {
        &self.dimensions
    }

    fn schema(&self) -> &StarSchema {
        &self.schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_lookup() {
        let registry = InMemorySemanticRegistry::cpg_secondary_sales();
        assert_eq!(
            registry.metric("secondary_sales_value").map(|m| m.column.as_str()),
            Some("net_value")
        );
        assert!(registry.dimension("brand").is_some());
        assert!(registry.metric("brand").is_none());
        assert!(registry.metric("Secondary_Sales_Value").is_none());
        for dimension in registry.dimensions() {
            assert!(
                dimension.table == registry.schema().fact_table
                    || registry.schema().dimension_table(&dimension.table).is_some()
            );
        }
    }

    #[test]
    fn test_json_registry_rejects_duplicates() {
        let raw = r#"{
            "schema": {
                "fact_table": "fact_sales", "fact_alias": "f", "date_column": "sold_on",
                "hierarchy_table": "dim_hier", "embedded_table": "sales",
                "cube_time_member": "Sales.soldOn", "cube_hierarchy": "Hier",
                "dimension_tables": [
                    {"name": "dim_hier", "alias": "h",
                     "join": {"fact_column": "hier_key", "dimension_column": "hier_key"}}
                ]
            },
            "metrics": [
                {"name": "revenue", "description": "", "aggregation": "sum",
                 "column": "amount", "cube_member": "Sales.amount"}
            ],
            "dimensions": [
                {"name": "revenue", "description": "", "table": "fact_sales",
                 "column": "amount", "cube_member": "Sales.amount"}
            ]
        }"#;
        let err = InMemorySemanticRegistry::from_json_str(raw).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }
}
