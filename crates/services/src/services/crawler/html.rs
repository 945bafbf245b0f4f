//! Tolerant extraction of product data from vendor catalog HTML.
//!
//! Vendor markup is messy and changes without notice, so this module avoids
//! brittle full-document selectors: it scans case-insensitively for
//! class-marked blocks, strips tags, and normalizes whitespace and entities.
//! Cards missing a sku, name, or price are skipped rather than failing the
//! page.

use std::sync::LazyLock;

use db::models::product::{CrawlProductData, ProductCategory};
use regex::Regex;

static PRICE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\s*([0-9][0-9,]*)(?:\.([0-9]{1,2}))?").expect("price regex")
});

/// Pull product cards out of one catalog page.
pub fn extract_products(html: &str, page_url: &str) -> Vec<CrawlProductData> {
    let mut products = Vec::new();

    for block in class_blocks(html, "product") {
        let sku = attr_in_block(block, "data-sku")
            .or_else(|| class_text(block, "sku").map(strip_label))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let name = heading_text(block)
            .or_else(|| class_text(block, "name"))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let price_cents = class_text(block, "price")
            .and_then(|text| parse_price_cents(&text))
            .or_else(|| parse_price_cents(block));

        let (Some(sku), Some(name), Some(unit_price_cents)) = (sku, name, price_cents) else {
            continue;
        };

        let description = class_text(block, "desc").map(|s| s.trim().to_string());
        let image_url = first_img_src(block);
        let category = guess_category(&name);

        products.push(CrawlProductData {
            sku,
            name,
            description,
            category,
            unit_price_cents,
            image_url,
            source_url: Some(page_url.to_string()),
        });
    }

    products
}

/// Keyword guess from the product name; unknown hardware lands in accessory.
pub fn guess_category(name: &str) -> ProductCategory {
    let lower = name.to_lowercase();
    if lower.contains("panel") || lower.contains("module") {
        ProductCategory::Panel
    } else if lower.contains("inverter") || lower.contains("optimizer") {
        ProductCategory::Inverter
    } else if lower.contains("battery") || lower.contains("storage") {
        ProductCategory::Battery
    } else if lower.contains("rack") || lower.contains("rail") || lower.contains("mount") {
        ProductCategory::Racking
    } else if lower.contains("monitor") || lower.contains("gateway") || lower.contains("meter") {
        ProductCategory::Monitoring
    } else {
        ProductCategory::Accessory
    }
}

/// "$1,299.99" → 129999. Takes the first dollar amount in the text.
pub fn parse_price_cents(text: &str) -> Option<i64> {
    let caps = PRICE_RE.captures(text)?;
    let dollars: i64 = caps
        .get(1)?
        .as_str()
        .replace(',', "")
        .parse()
        .ok()?;
    let cents: i64 = match caps.get(2) {
        Some(frac) if frac.as_str().len() == 1 => frac.as_str().parse::<i64>().ok()? * 10,
        Some(frac) => frac.as_str().parse().ok()?,
        None => 0,
    };
    dollars.checked_mul(100)?.checked_add(cents)
}

/// Top-level elements (any tag) whose class attribute contains the marker.
/// Nested same-tag elements are balanced so a card's markup stays together.
fn class_blocks<'a>(html: &'a str, class_marker: &'a str) -> Vec<&'a str> {
    let lower = html.to_ascii_lowercase();
    let mut blocks = Vec::new();
    let mut at = 0;

    while let Some(rel) = lower[at..].find('<') {
        let open = at + rel;
        let Some(tag_end_rel) = lower[open..].find('>') else {
            break;
        };
        let tag_end = open + tag_end_rel;
        let tag_src = &html[open..=tag_end];
        let tag_name = tag_name_of(&lower[open..=tag_end]);

        let is_match = !tag_name.is_empty()
            && !tag_src.starts_with("</")
            && find_attr(tag_src, "class")
                .map(|class| class.to_ascii_lowercase().contains(class_marker))
                .unwrap_or(false);

        if !is_match {
            at = tag_end + 1;
            continue;
        }

        // Balance nested occurrences of the same tag to find our close.
        let open_marker = format!("<{tag_name}");
        let close_marker = format!("</{tag_name}");
        let mut depth = 1usize;
        let mut scan = tag_end + 1;
        let mut close_at = html.len();
        while depth > 0 {
            let next_open = lower[scan..].find(&open_marker).map(|i| scan + i);
            let next_close = lower[scan..].find(&close_marker).map(|i| scan + i);
            match (next_open, next_close) {
                (Some(o), Some(c)) if o < c => {
                    depth += 1;
                    scan = o + open_marker.len();
                }
                (_, Some(c)) => {
                    depth -= 1;
                    close_at = c;
                    scan = c + close_marker.len();
                }
                _ => break, // unterminated; take the rest of the page
            }
        }

        blocks.push(&html[open..close_at.min(html.len())]);
        at = scan.max(tag_end + 1);
    }

    blocks
}

fn tag_name_of(tag_lower: &str) -> String {
    tag_lower
        .trim_start_matches('<')
        .trim_start_matches('/')
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect()
}

/// Value of an attribute anywhere in the block's opening tags.
fn attr_in_block(block: &str, attr: &str) -> Option<String> {
    let lower = block.to_ascii_lowercase();
    let needle = format!("{attr}=");
    let mut at = 0;
    while let Some(rel) = lower[at..].find(&needle) {
        let pos = at + rel;
        // Only accept the match when it sits inside a tag.
        let tag_open = lower[..pos].rfind('<');
        let tag_close = lower[..pos].rfind('>');
        if tag_open.is_some() && tag_open > tag_close {
            let value_start = pos + needle.len();
            return read_attr_value(&block[value_start..]);
        }
        at = pos + needle.len();
    }
    None
}

/// Value of an attribute within a single tag's source.
fn find_attr(tag_src: &str, attr: &str) -> Option<String> {
    let lower = tag_src.to_ascii_lowercase();
    let needle = format!("{attr}=");
    let pos = lower.find(&needle)?;
    read_attr_value(&tag_src[pos + needle.len()..])
}

fn read_attr_value(rest: &str) -> Option<String> {
    let mut chars = rest.chars();
    match chars.next()? {
        quote @ ('"' | '\'') => Some(rest[1..].split(quote).next()?.to_string()),
        _ => Some(
            rest.split(|c: char| c.is_whitespace() || c == '>')
                .next()?
                .to_string(),
        ),
    }
}

/// Inner text of the first h1..h4 in the block.
fn heading_text(block: &str) -> Option<String> {
    let lower = block.to_ascii_lowercase();
    let mut best: Option<(usize, String)> = None;
    for tag in ["h1", "h2", "h3", "h4"] {
        let open = format!("<{tag}");
        if let Some(pos) = lower.find(&open) {
            if best.as_ref().map(|(p, _)| pos < *p).unwrap_or(true) {
                if let Some(text) = inner_text_at(block, &lower, pos, tag) {
                    best = Some((pos, text));
                }
            }
        }
    }
    best.map(|(_, text)| text)
}

/// Inner text of the first element whose class contains the marker.
fn class_text(block: &str, class_marker: &str) -> Option<String> {
    let lower = block.to_ascii_lowercase();
    let mut at = 0;
    while let Some(rel) = lower[at..].find('<') {
        let open = at + rel;
        let Some(end_rel) = lower[open..].find('>') else {
            return None;
        };
        let tag_end = open + end_rel;
        let tag_src = &block[open..=tag_end];
        let tag_name = tag_name_of(&lower[open..=tag_end]);
        if !tag_src.starts_with("</")
            && find_attr(tag_src, "class")
                .map(|class| class.to_ascii_lowercase().contains(class_marker))
                .unwrap_or(false)
        {
            return inner_text_at(block, &lower, open, &tag_name);
        }
        at = tag_end + 1;
    }
    None
}

fn inner_text_at(block: &str, lower: &str, open_pos: usize, tag: &str) -> Option<String> {
    let content_start = lower[open_pos..].find('>').map(|i| open_pos + i + 1)?;
    let close = format!("</{tag}");
    let content_end = lower[content_start..]
        .find(&close)
        .map(|i| content_start + i)?;
    let text = normalize_ws(&decode_entities(&strip_tags(&block[content_start..content_end])));
    if text.is_empty() { None } else { Some(text) }
}

fn first_img_src(block: &str) -> Option<String> {
    let lower = block.to_ascii_lowercase();
    let pos = lower.find("<img")?;
    let end = lower[pos..].find('>').map(|i| pos + i)?;
    find_attr(&block[pos..=end], "src").filter(|s| !s.is_empty())
}

/// Drop "SKU:"-style labels that ride along with the value.
fn strip_label(text: String) -> String {
    match text.split_once(':') {
        Some((label, rest)) if label.len() <= 12 => rest.to_string(),
        _ => text,
    }
}

pub fn strip_tags(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_tag = false;
    for c in s.chars() {
        match c {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                out.push(' ');
            }
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

pub fn decode_entities(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
}

pub fn normalize_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
    <html><body>
      <div class="catalog">
        <div class="product-card" data-sku="SPR-400">
          <img src="/img/spr400.jpg" alt="">
          <h3>SunPower 400W <b>Panel</b></h3>
          <p class="desc">High-efficiency &amp; all-black.</p>
          <span class="price">$289.50</span>
        </div>
        <div class="product-card">
          <h3>Enphase IQ8+ Microinverter</h3>
          <span class="sku">SKU: IQ8-PLUS</span>
          <span class="price">$ 1,024</span>
        </div>
        <div class="product-card">
          <h3>Mystery item with no price</h3>
          <span class="sku">SKU: NOPE</span>
        </div>
      </div>
    </body></html>
    "#;

    #[test]
    fn extracts_complete_cards_and_skips_broken_ones() {
        let products = extract_products(PAGE, "https://vendor.example/catalog");
        assert_eq!(products.len(), 2);

        let panel = &products[0];
        assert_eq!(panel.sku, "SPR-400");
        assert_eq!(panel.name, "SunPower 400W Panel");
        assert_eq!(panel.unit_price_cents, 28_950);
        assert_eq!(panel.category, ProductCategory::Panel);
        assert_eq!(panel.description.as_deref(), Some("High-efficiency & all-black."));
        assert_eq!(panel.image_url.as_deref(), Some("/img/spr400.jpg"));
        assert_eq!(
            panel.source_url.as_deref(),
            Some("https://vendor.example/catalog")
        );

        let inverter = &products[1];
        assert_eq!(inverter.sku, "IQ8-PLUS");
        assert_eq!(inverter.unit_price_cents, 102_400);
        assert_eq!(inverter.category, ProductCategory::Inverter);
    }

    #[test]
    fn price_parsing_handles_commas_and_partial_cents() {
        assert_eq!(parse_price_cents("$1,299.99"), Some(129_999));
        assert_eq!(parse_price_cents("from $89"), Some(8_900));
        assert_eq!(parse_price_cents("$12.5"), Some(1_250));
        assert_eq!(parse_price_cents("no price here"), None);
    }

    #[test]
    fn category_guessing() {
        assert_eq!(guess_category("400W Solar Module"), ProductCategory::Panel);
        assert_eq!(guess_category("IQ Battery 5P"), ProductCategory::Battery);
        assert_eq!(guess_category("IronRidge XR Rail"), ProductCategory::Racking);
        assert_eq!(guess_category("Envoy Gateway"), ProductCategory::Monitoring);
        assert_eq!(guess_category("MC4 Connector"), ProductCategory::Accessory);
    }

    #[test]
    fn text_helpers_normalize() {
        assert_eq!(normalize_ws(&strip_tags("a<b>c</b>d")), "a c d");
        assert_eq!(decode_entities("a &amp; b&nbsp;c"), "a & b c");
        assert_eq!(normalize_ws("  a \n\t b  "), "a b");
    }

    #[test]
    fn case_insensitive_markup() {
        let html = r#"<DIV CLASS="Product" DATA-SKU="X1"><H2>Rail Kit</H2><SPAN CLASS="Price">$10.00</SPAN></DIV>"#;
        let products = extract_products(html, "u");
        assert_eq!(products.len(), 1);
        assert_eq!(products[0].sku, "X1");
        assert_eq!(products[0].unit_price_cents, 1_000);
    }
}
