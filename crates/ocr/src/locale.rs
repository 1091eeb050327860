//! Vocabulary used by the heuristic parsers.
//!
//! Everything language specific (total markers, header words, date formats,
//! category labels and product keywords) lives here as data so another locale
//! can be dropped in through TOML without touching the parsing code.

use std::collections::HashMap;

use lens_core::Category;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryKeywords {
    pub category: Category,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Locale {
    /// Lowercase words that mark the line carrying the receipt total.
    pub total_markers: Vec<String>,
    /// Lowercase substrings of lines that are never line items.
    pub header_keywords: Vec<String>,
    /// `chrono` formats tried in order against date-shaped tokens.
    pub date_formats: Vec<String>,
    /// Localised category labels, lowercase, mapped to the canonical set.
    pub category_aliases: HashMap<String, Category>,
    /// Checked in order; the first keyword contained in a product name wins.
    pub category_keywords: Vec<CategoryKeywords>,
    pub unknown_store: String,
    pub catch_all_item: String,
    pub placeholder_item: String,
    pub generic_item: String,
}

impl Default for Locale {
    fn default() -> Self {
        Locale::spanish()
    }
}

fn owned(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| w.to_string()).collect()
}

impl Locale {
    /// Spanish supermarket receipts, with the common English markers as well.
    pub fn spanish() -> Self {
        let category_aliases = [
            ("bebidas", Category::Beverages),
            ("carne", Category::Meat),
            ("verduras", Category::Produce),
            ("lácteos", Category::Dairy),
            ("lacteos", Category::Dairy),
            ("panadería", Category::Bakery),
            ("panaderia", Category::Bakery),
            ("limpieza", Category::Cleaning),
            ("ocio", Category::Leisure),
            ("otros", Category::Other),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let keywords = |category, words: &[&str]| CategoryKeywords {
            category,
            keywords: owned(words),
        };

        Locale {
            total_markers: owned(&["total", "suma", "importe", "amount", "sum", "balance", "pagar"]),
            header_keywords: owned(&["total", "suma", "importe", "ticket", "factura"]),
            date_formats: owned(&["%d/%m/%Y", "%d-%m-%Y", "%d/%m/%y", "%d-%m-%y"]),
            category_aliases,
            category_keywords: vec![
                keywords(
                    Category::Beverages,
                    &[
                        "cerveza", "cerv", "vino", "agua", "zumo", "refresco", "coca cola", "pepsi",
                        "fanta", "sprite", "nestea", "aquarius", "bebida", "drink",
                    ],
                ),
                keywords(
                    Category::Meat,
                    &[
                        "carne", "pollo", "cerdo", "ternera", "cordero", "pavo", "jamon", "jamón",
                        "chorizo", "salchicha", "hamburguesa", "filete", "bacon",
                    ],
                ),
                keywords(
                    Category::Produce,
                    &[
                        "verdura", "lechuga", "tomate", "cebolla", "patata", "zanahoria", "pepino",
                        "pimiento", "calabacin", "berenjena", "espinaca", "fruta", "manzana",
                        "platano", "naranja", "pera", "uva",
                    ],
                ),
                keywords(Category::Dairy, &["leche", "yogur", "queso", "mantequilla", "nata", "lacteo"]),
                keywords(
                    Category::Bakery,
                    &[
                        "pan", "barra", "bollo", "croissant", "magdalena", "galleta", "pastel",
                        "tarta", "bizcocho",
                    ],
                ),
                keywords(
                    Category::Cleaning,
                    &[
                        "detergente", "lavavajillas", "lejia", "limpiador", "papel", "servilleta",
                        "fregona", "estropajo", "jabon", "jabón",
                    ],
                ),
                keywords(
                    Category::Leisure,
                    &["revista", "libro", "periodico", "periódico", "juguete", "juego"],
                ),
            ],
            unknown_store: "Unknown Store".to_string(),
            catch_all_item: "Items from receipt".to_string(),
            placeholder_item: "Unable to parse receipt details".to_string(),
            generic_item: "General purchase".to_string(),
        }
    }

    pub fn from_toml(toml_content: &str) -> Result<Self, String> {
        toml::from_str(toml_content).map_err(|e| format!("Failed to parse locale TOML: {e}"))
    }

    /// Canonical category for a label reported by a backend. Unknown labels are `Other`.
    pub fn normalize_category(&self, label: &str) -> Category {
        let key = label.trim().to_lowercase();
        if let Some(category) = self.category_aliases.get(&key) {
            return *category;
        }
        Category::from_label(&key)
    }

    /// Keyword lookup used when a backend only gives us a product name.
    pub fn classify_product(&self, product_name: &str) -> Category {
        let name = product_name.to_lowercase();
        self.category_keywords
            .iter()
            .find(|ck| ck.keywords.iter().any(|k| name.contains(k.as_str())))
            .map(|ck| ck.category)
            .unwrap_or(Category::Other)
    }

    /// Markers only match whole words, so `sum` does not fire on `consumo`.
    pub fn is_total_line(&self, line: &str) -> bool {
        let lower = line.to_lowercase();
        let words: Vec<&str> = lower.split(|c: char| !c.is_alphabetic()).filter(|w| !w.is_empty()).collect();
        self.total_markers.iter().any(|marker| {
            let marker: Vec<&str> = marker.split_whitespace().collect();
            !marker.is_empty() && words.windows(marker.len()).any(|w| w == marker.as_slice())
        })
    }

    pub fn is_header_line(&self, line: &str) -> bool {
        let lower = line.to_lowercase();
        self.header_keywords.iter().any(|k| lower.contains(k.as_str()))
    }
}
