//! Derived cost fields
//!
//! Recomputes the figures that depend on other figures in the same record:
//! per-channel and overall cost-per-lead on the channel-distribution slide,
//! and the investment totals on the service-bundle slide. Derivation is total
//! (missing inputs count as zero) and idempotent.
//!
//! Only per-unit cost-per-lead values are rounded (2 dp). Money aggregates are
//! left unrounded so rounding error does not compound across totals.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use tracing::debug;

use crate::record::Record;

/// Which slides carry the derivable blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DerivationScope {
    pub distribution_slide: String,
    pub services_slide: String,
}

impl Default for DerivationScope {
    fn default() -> Self {
        Self {
            distribution_slide: "slide14".to_string(),
            services_slide: "slide19".to_string(),
        }
    }
}

/// Coerce a raw record value into a number.
///
/// Strings keep only digits, `.`, `,` and `-`; commas are then dropped as
/// thousands separators. Anything unparseable, absent or non-scalar is 0.
pub fn to_number(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => {
            let cleaned: String = s
                .chars()
                .filter(|c| c.is_ascii_digit() || matches!(c, '.' | '-'))
                .collect();
            if cleaned.is_empty() {
                return 0.0;
            }
            cleaned.parse::<f64>().unwrap_or(0.0)
        }
        _ => 0.0,
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Integral values are stored as JSON integers so they serialize the way the
/// source wrote them.
pub(crate) fn number_value(value: f64) -> Value {
    const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;
    if value.fract() == 0.0 && value.abs() <= MAX_SAFE_INTEGER {
        Value::from(value as i64)
    } else {
        Number::from_f64(value).map(Value::Number).unwrap_or_else(|| Value::from(0))
    }
}

/// Named formula summaries computed from an already-derived record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormulaId {
    Distribution,
    Services,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelCost {
    pub channel: String,
    pub cost_per_lead: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "formula")]
pub enum Formula {
    #[serde(rename_all = "camelCase")]
    Distribution {
        cost_per_lead: f64,
        total_investment: f64,
        channels: Vec<ChannelCost>,
    },
    #[serde(rename_all = "camelCase")]
    Services {
        monthly_investment: f64,
        first_period_investment: f64,
        ad_commission: f64,
    },
}

/// Pure recomputation of dependent fields.
#[derive(Debug, Clone, Default)]
pub struct DerivationEngine {
    scope: DerivationScope,
}

impl DerivationEngine {
    pub fn new(scope: DerivationScope) -> Self {
        Self { scope }
    }

    pub fn scope(&self) -> &DerivationScope {
        &self.scope
    }

    /// Recompute every derived field in place. The distribution slide goes
    /// first because the services slide reads its total investment.
    pub fn derive(&self, record: &mut Record) {
        self.derive_distribution(record);
        self.derive_services(record);
    }

    fn derive_distribution(&self, record: &mut Record) {
        let Some(Value::Object(slide)) = record.slides.get_mut(&self.scope.distribution_slide)
        else {
            return;
        };
        let Some(Value::Object(channels)) = slide.get_mut("distribution") else {
            return;
        };

        let mut total_investment = 0.0;
        let mut total_leads = 0.0;
        for channel in channels.values_mut() {
            let investment = to_number(channel.get("investment"));
            let leads = to_number(channel.get("leads"));
            total_investment += investment;
            total_leads += leads;

            if leads > 0.0 {
                if let Value::Object(fields) = channel {
                    fields.insert(
                        "costPerLead".to_string(),
                        number_value(round2(investment / leads)),
                    );
                }
            }
        }

        let cost_per_lead = if total_leads > 0.0 {
            round2(total_investment / total_leads)
        } else {
            0.0
        };

        slide.insert("totalInvestment".to_string(), number_value(total_investment));
        slide.insert("totalLeads".to_string(), number_value(total_leads));
        slide.insert("costPerLead".to_string(), number_value(cost_per_lead));

        debug!(
            slide = %self.scope.distribution_slide,
            total_investment,
            total_leads,
            cost_per_lead,
            "derived distribution totals"
        );
    }

    fn derive_services(&self, record: &mut Record) {
        let distribution_total = record
            .slide(&self.scope.distribution_slide)
            .and_then(|slide| slide.get("totalInvestment"))
            .filter(|value| !value.is_null())
            .map(|value| to_number(Some(value)));

        let Some(Value::Object(slide)) = record.slides.get_mut(&self.scope.services_slide) else {
            return;
        };
        let Some(services) = slide.get("services").filter(|value| value.is_object()) else {
            return;
        };

        let cost = |service: &str, key: &str| {
            to_number(services.get(service).and_then(|fields| fields.get(key)))
        };

        let initial_investment =
            cost("content", "oneTime") + cost("adCreation", "oneTime") + cost("adManagement", "setupCost");
        let monthly_services_total =
            cost("content", "monthly") + cost("adCreation", "monthly") + cost("adManagement", "monthly");

        let media_investment = distribution_total.unwrap_or_else(|| {
            to_number(slide.get("totals").and_then(|totals| totals.get("mediaInvestment")))
        });
        let monthly_investment = monthly_services_total + media_investment;
        let first_period_investment = initial_investment + monthly_investment;

        let totals = slide
            .entry("totals")
            .or_insert_with(|| Value::Object(Map::new()));
        if !totals.is_object() {
            *totals = Value::Object(Map::new());
        }
        if let Value::Object(totals) = totals {
            totals.insert("initialInvestment".to_string(), number_value(initial_investment));
            totals.insert("monthlyServicesTotal".to_string(), number_value(monthly_services_total));
            totals.insert("mediaInvestment".to_string(), number_value(media_investment));
            totals.insert("monthlyInvestment".to_string(), number_value(monthly_investment));
            totals.insert(
                "firstPeriodInvestment".to_string(),
                number_value(first_period_investment),
            );
        }

        debug!(
            slide = %self.scope.services_slide,
            initial_investment,
            monthly_investment,
            first_period_investment,
            "derived service totals"
        );
    }

    /// Summaries over an already-derived record. `None` when the slide the
    /// formula reads from is absent.
    pub fn formula(&self, record: &Record, id: FormulaId) -> Option<Formula> {
        match id {
            FormulaId::Distribution => {
                let slide = record.slide(&self.scope.distribution_slide)?;
                let total_investment = to_number(slide.get("totalInvestment"));
                let total_leads = to_number(slide.get("totalLeads"));
                let channels = slide
                    .get("distribution")
                    .and_then(Value::as_object)
                    .map(|channels| {
                        channels
                            .iter()
                            .filter_map(|(name, fields)| {
                                let leads = to_number(fields.get("leads"));
                                (leads > 0.0).then(|| ChannelCost {
                                    channel: name.clone(),
                                    cost_per_lead: to_number(fields.get("investment")) / leads,
                                })
                            })
                            .collect()
                    })
                    .unwrap_or_default();

                Some(Formula::Distribution {
                    cost_per_lead: if total_leads > 0.0 {
                        total_investment / total_leads
                    } else {
                        0.0
                    },
                    total_investment,
                    channels,
                })
            }
            FormulaId::Services => {
                let slide = record.slide(&self.scope.services_slide)?;
                let totals = slide.get("totals")?;
                let commission_rate = to_number(
                    slide
                        .get("services")
                        .and_then(|services| services.get("adManagement"))
                        .and_then(|fields| fields.get("commissionRate")),
                );

                Some(Formula::Services {
                    monthly_investment: to_number(totals.get("monthlyInvestment")),
                    first_period_investment: to_number(totals.get("firstPeriodInvestment")),
                    ad_commission: to_number(totals.get("mediaInvestment")) * commission_rate,
                })
            }
        }
    }
}
