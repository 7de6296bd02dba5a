//! Built-in registry for the Mexican commercial banking system.
//!
//! Used when no exported registry file is configured, and as the fixture
//! registry in tests.

use super::{
    BankDefinition, ColumnSchema, FilterDefinition, MetricDefinition, MetricUnit, Registry,
    SchemaWhitelist, TableSchema,
};

pub const PRIMARY_TABLE: &str = "monthly_kpis";
pub const SEGMENT_TABLE: &str = "segment_kpis";

impl Registry {
    pub fn builtin() -> Self {
        Self {
            banks: builtin_banks(),
            metrics: builtin_metrics(),
            filters: builtin_filters(),
            unsupported_terms: [
                "roe",
                "roa",
                "utilidad",
                "utilidad neta",
                "margen financiero",
                "nim",
                "indice de eficiencia",
                "eficiencia operativa",
            ]
            .iter()
            .map(|t| t.to_string())
            .collect(),
            schema: builtin_schema(),
        }
    }
}

fn builtin_banks() -> Vec<BankDefinition> {
    vec![
        BankDefinition::new("INVEX", "Invex", &["banco invex", "invex banco"]),
        BankDefinition::new("BBVA", "BBVA México", &["bbva mexico", "bancomer", "bbva bancomer"]),
        BankDefinition::new("BANORTE", "Banorte", &["gfnorte", "grupo financiero banorte"]),
        BankDefinition::new("SANTANDER", "Santander", &["banco santander", "santander mexico"]),
        BankDefinition::new("BANAMEX", "Banamex", &["citibanamex", "citi banamex", "citi"]),
        BankDefinition::new("HSBC", "HSBC", &["hsbc mexico"]),
        BankDefinition::new("SCOTIABANK", "Scotiabank", &["scotia", "scotiabank inverlat"]),
        BankDefinition::new("INBURSA", "Inbursa", &["banco inbursa"]),
        BankDefinition::new("BANREGIO", "Banregio", &["banco regional"]),
        BankDefinition::new("AZTECA", "Banco Azteca", &["azteca"]),
        BankDefinition::new(
            "SYSTEM",
            "Sistema",
            &[
                "sistema bancario",
                "sistema financiero",
                "banca multiple",
                "total sistema",
                "mercado",
                "industria",
            ],
        )
        .aggregate(),
    ]
}

fn builtin_metrics() -> Vec<MetricDefinition> {
    vec![
        MetricDefinition::new(
            "IMOR",
            "Índice de morosidad",
            "Cartera vencida entre cartera total; mide el deterioro del crédito",
            "imor",
            MetricUnit::Ratio,
        )
        .with_aliases(&["indice de morosidad", "morosidad", "tasa de morosidad"])
        .with_range(0.0, 1.0)
        .segmented()
        .higher_is_worse(),
        MetricDefinition::new(
            "ICOR",
            "Índice de cobertura",
            "Estimaciones preventivas entre cartera vencida",
            "icor",
            MetricUnit::Ratio,
        )
        .with_aliases(&["indice de cobertura", "cobertura", "cobertura de cartera vencida"])
        .with_range(0.0, 10.0)
        .segmented(),
        MetricDefinition::new(
            "ICAP",
            "Índice de capitalización",
            "Capital neto entre activos sujetos a riesgo totales, en porcentaje",
            "icap",
            MetricUnit::Percent,
        )
        .with_aliases(&["indice de capitalizacion", "capitalizacion", "solvencia"])
        .with_range(0.0, 100.0),
        MetricDefinition::new(
            "CARTERA_TOTAL",
            "Cartera total",
            "Saldo de la cartera de crédito total en millones de pesos",
            "cartera_total",
            MetricUnit::MxnMillions,
        )
        .with_aliases(&["cartera", "cartera de credito", "credito total", "saldo de cartera"])
        .with_range(0.0, 5_000_000.0)
        .segmented(),
        MetricDefinition::new(
            "CARTERA_VENCIDA",
            "Cartera vencida",
            "Saldo de la cartera en etapa 3 en millones de pesos",
            "cartera_vencida",
            MetricUnit::MxnMillions,
        )
        .with_aliases(&["vencida", "cartera en etapa 3", "cartera etapa 3"])
        .with_range(0.0, 500_000.0)
        .segmented()
        .higher_is_worse(),
        MetricDefinition::new(
            "RESERVAS",
            "Reservas preventivas",
            "Estimaciones preventivas para riesgos crediticios en millones de pesos",
            "reservas",
            MetricUnit::MxnMillions,
        )
        .with_aliases(&["estimaciones preventivas", "epcr", "reservas crediticias"])
        .with_range(0.0, 500_000.0),
    ]
}

fn builtin_filters() -> Vec<FilterDefinition> {
    vec![
        FilterDefinition::new("automotriz", "Automotriz", &["autos", "automotor", "credito automotriz"]),
        FilterDefinition::new("consumo", "Consumo", &["credito al consumo"]),
        FilterDefinition::new("vivienda", "Vivienda", &["hipotecario", "hipotecas", "credito hipotecario"]),
        FilterDefinition::new("empresas", "Empresas", &["empresarial", "comercial", "credito comercial"]),
        FilterDefinition::new("tarjeta", "Tarjeta de crédito", &["tarjetas", "tarjeta de credito", "tdc"]),
        FilterDefinition::new("nomina", "Nómina y personales", &["personales", "credito de nomina"]),
    ]
}

fn builtin_schema() -> SchemaWhitelist {
    let primary = TableSchema {
        name: PRIMARY_TABLE.to_string(),
        description: "Indicadores mensuales por banco, incluido el agregado del sistema".to_string(),
        columns: vec![
            ColumnSchema::new("bank_id", "text", "Identificador canónico del banco"),
            ColumnSchema::new("period", "date", "Primer día del mes reportado"),
            ColumnSchema::new("imor", "double precision", "Índice de morosidad (fracción)"),
            ColumnSchema::new("icor", "double precision", "Índice de cobertura (fracción)"),
            ColumnSchema::new("icap", "double precision", "Índice de capitalización (porcentaje)"),
            ColumnSchema::new("cartera_total", "double precision", "Cartera total, millones MXN"),
            ColumnSchema::new("cartera_vencida", "double precision", "Cartera vencida, millones MXN"),
            ColumnSchema::new("reservas", "double precision", "Reservas preventivas, millones MXN"),
        ],
        time_column: "period".to_string(),
        bank_column: "bank_id".to_string(),
        segment_column: None,
    };

    let segments = TableSchema {
        name: SEGMENT_TABLE.to_string(),
        description: "Indicadores mensuales por banco y segmento de crédito".to_string(),
        columns: vec![
            ColumnSchema::new("bank_id", "text", "Identificador canónico del banco"),
            ColumnSchema::new("period", "date", "Primer día del mes reportado"),
            ColumnSchema::new("segment", "text", "Segmento de crédito (automotriz, consumo...)"),
            ColumnSchema::new("imor", "double precision", "Índice de morosidad del segmento"),
            ColumnSchema::new("icor", "double precision", "Índice de cobertura del segmento"),
            ColumnSchema::new("cartera_total", "double precision", "Cartera del segmento, millones MXN"),
            ColumnSchema::new("cartera_vencida", "double precision", "Cartera vencida del segmento"),
        ],
        time_column: "period".to_string(),
        bank_column: "bank_id".to_string(),
        segment_column: Some("segment".to_string()),
    };

    SchemaWhitelist {
        tables: vec![primary, segments],
        primary_table: PRIMARY_TABLE.to_string(),
        segment_table: Some(SEGMENT_TABLE.to_string()),
    }
}
