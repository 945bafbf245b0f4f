//! Renders the customer-facing quote document (HTML, printable and mailable).

use std::sync::LazyLock;

use db::models::{company::Company, customer::Customer, quote::QuoteWithItems};
use tera::{Context, Tera};
use thiserror::Error;

use super::pricing::QuoteTotals;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("template error: {0}")]
    Template(#[from] tera::Error),
}

const QUOTE_TEMPLATE: &str = r#"<!doctype html>
<html>
<head>
<meta charset="utf-8">
<title>Quote {{ quote_number }}</title>
<style>
  body { font-family: Helvetica, Arial, sans-serif; color: #1a1a1a; margin: 2em; }
  table { border-collapse: collapse; width: 100%; margin-top: 1em; }
  th, td { text-align: left; padding: 6px 10px; border-bottom: 1px solid #ddd; }
  td.num, th.num { text-align: right; }
  .totals td { border: none; }
  .terms { margin-top: 2em; font-size: 0.85em; color: #555; }
</style>
</head>
<body>
{% if branded and logo_url %}<img src="{{ logo_url }}" alt="{{ company_name }}" style="max-height:60px">{% endif %}
<h1>{{ company_name }}</h1>
{% if company_address %}<p>{{ company_address }}</p>{% endif %}
<h2>Quote {{ quote_number }}</h2>
<p>Prepared for <strong>{{ customer_name }}</strong>{% if customer_address %}, {{ customer_address }}{% endif %}</p>
{% if valid_until %}<p>Valid until {{ valid_until }}</p>{% endif %}
<table>
  <thead>
    <tr><th>Item</th><th class="num">Qty</th><th class="num">Unit price</th><th class="num">Amount</th></tr>
  </thead>
  <tbody>
  {% for item in items %}
    <tr>
      <td>{{ item.description }}</td>
      <td class="num">{{ item.quantity }}</td>
      <td class="num">{{ item.unit_price }}</td>
      <td class="num">{{ item.extension }}</td>
    </tr>
  {% endfor %}
  </tbody>
</table>
<table class="totals">
  <tr><td></td><td class="num">Subtotal</td><td class="num">{{ subtotal }}</td></tr>
  {% if has_discount %}<tr><td></td><td class="num">Discount</td><td class="num">-{{ discount }}</td></tr>{% endif %}
  <tr><td></td><td class="num">Shipping</td><td class="num">{{ shipping }}</td></tr>
  <tr><td></td><td class="num">Tax</td><td class="num">{{ tax }}</td></tr>
  <tr><td></td><td class="num"><strong>Total</strong></td><td class="num"><strong>{{ total }}</strong></td></tr>
</table>
{% if notes %}<p>{{ notes }}</p>{% endif %}
{% if quote_terms %}<div class="terms">{{ quote_terms }}</div>{% endif %}
</body>
</html>
"#;

static TEMPLATES: LazyLock<Tera> = LazyLock::new(|| {
    let mut tera = Tera::default();
    tera.add_raw_template("quote.html", QUOTE_TEMPLATE)
        .expect("quote template parses");
    tera
});

/// "$1,299.99" for USD, "1,299.99 EUR" otherwise.
pub fn format_cents(cents: i64, currency: &str) -> String {
    let negative = cents < 0;
    let cents = cents.unsigned_abs();
    let dollars = cents / 100;
    let frac = cents % 100;

    let digits = dollars.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    let sign = if negative { "-" } else { "" };
    if currency == "USD" {
        format!("{sign}${grouped}.{frac:02}")
    } else {
        format!("{sign}{grouped}.{frac:02} {currency}")
    }
}

pub fn render_quote_document(
    company: &Company,
    customer: &Customer,
    quote: &QuoteWithItems,
    totals: &QuoteTotals,
    branded: bool,
) -> Result<String, RenderError> {
    let currency = company.currency.as_str();

    let items: Vec<serde_json::Value> = quote
        .items
        .iter()
        .map(|item| {
            serde_json::json!({
                "description": item.description,
                "quantity": item.quantity,
                "unit_price": format_cents(item.unit_price_cents, currency),
                "extension": format_cents(item.unit_price_cents * item.quantity, currency),
            })
        })
        .collect();

    let mut context = Context::new();
    context.insert("branded", &branded);
    context.insert("company_name", &company.name);
    context.insert("company_address", &company.address);
    context.insert("logo_url", &company.logo_url);
    context.insert("quote_terms", &company.quote_terms);
    context.insert("quote_number", &quote.quote_number);
    context.insert("customer_name", &customer.name);
    context.insert("customer_address", &customer.address);
    context.insert(
        "valid_until",
        &quote.valid_until.map(|d| d.format("%Y-%m-%d").to_string()),
    );
    context.insert("items", &items);
    context.insert("subtotal", &format_cents(totals.subtotal_cents, currency));
    context.insert("has_discount", &(totals.discount_cents > 0));
    context.insert("discount", &format_cents(totals.discount_cents, currency));
    context.insert("shipping", &format_cents(totals.shipping_cents, currency));
    context.insert("tax", &format_cents(totals.tax_cents, currency));
    context.insert("total", &format_cents(totals.total_cents, currency));
    context.insert("notes", &quote.notes);

    Ok(TEMPLATES.render("quote.html", &context)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use db::models::quote::{Quote, QuoteItem, QuoteStatus};
    use uuid::Uuid;

    #[test]
    fn money_formatting() {
        assert_eq!(format_cents(0, "USD"), "$0.00");
        assert_eq!(format_cents(129_999, "USD"), "$1,299.99");
        assert_eq!(format_cents(1_000_000_00, "USD"), "$1,000,000.00");
        assert_eq!(format_cents(-2_050, "USD"), "-$20.50");
        assert_eq!(format_cents(129_999, "EUR"), "1,299.99 EUR");
    }

    fn fixture() -> (Company, Customer, QuoteWithItems, QuoteTotals) {
        let now = Utc::now();
        let company_id = Uuid::new_v4();
        let company = Company {
            id: company_id,
            name: "Sunbeam Solar".to_string(),
            slug: "sunbeam-solar".to_string(),
            contact_email: "ops@sunbeam.example".to_string(),
            phone: None,
            address: Some("1 Solar Way".to_string()),
            website: None,
            logo_url: Some("https://cdn.example/logo.png".to_string()),
            quote_terms: Some("Net 30.".to_string()),
            default_tax_rate_bps: 0,
            currency: "USD".to_string(),
            api_key: "qc_test".to_string(),
            created_at: now,
            updated_at: now,
        };
        let customer = Customer {
            id: Uuid::new_v4(),
            company_id,
            name: "Jordan Reyes".to_string(),
            email: Some("jordan@example.com".to_string()),
            phone: None,
            address: None,
            notes: None,
            created_at: now,
            updated_at: now,
        };
        let quote_id = Uuid::new_v4();
        let quote = Quote {
            id: quote_id,
            company_id,
            customer_id: customer.id,
            number_seq: 7,
            quote_number: "Q-00007".to_string(),
            status: QuoteStatus::Draft,
            discount_cents: 1_000,
            shipping_cents: 2_500,
            tax_rate_bps: 825,
            notes: None,
            valid_until: None,
            sent_at: None,
            viewed_at: None,
            responded_at: None,
            created_at: now,
            updated_at: now,
        };
        let items = vec![QuoteItem {
            id: Uuid::new_v4(),
            quote_id,
            product_id: None,
            description: "SunPower 400W Panel".to_string(),
            unit_price_cents: 28_950,
            quantity: 12,
            position: 0,
        }];
        let totals = QuoteTotals {
            subtotal_cents: 347_400,
            discount_cents: 1_000,
            shipping_cents: 2_500,
            tax_cents: 28_578,
            total_cents: 377_478,
        };
        (company, customer, QuoteWithItems { quote, items }, totals)
    }

    #[test]
    fn document_carries_the_numbers() {
        let (company, customer, quote, totals) = fixture();
        let html = render_quote_document(&company, &customer, &quote, &totals, false).unwrap();

        assert!(html.contains("Quote Q-00007"));
        assert!(html.contains("SunPower 400W Panel"));
        assert!(html.contains("$3,474.00")); // subtotal
        assert!(html.contains("$3,774.78")); // total
        assert!(html.contains("Net 30."));
        // Unbranded documents never embed the logo.
        assert!(!html.contains("cdn.example/logo.png"));
    }

    #[test]
    fn branded_document_shows_logo() {
        let (company, customer, quote, totals) = fixture();
        let html = render_quote_document(&company, &customer, &quote, &totals, true).unwrap();
        assert!(html.contains("cdn.example/logo.png"));
    }
}
