//! SRI `factura` v2.0.0 document assembly.
//!
//! The document is written by hand rather than through a serializer: the
//! reception service rejects self-closing tags, so every element is emitted
//! as `<tag>value</tag>`.

use std::collections::BTreeMap;

use unicode_normalization::UnicodeNormalization;

use crate::{
    AccessKey, EmissionType, Environment, MoneyCents, ResultEngine, Sale, TaxRate,
    access_key::INVOICE_DOCUMENT_TYPE,
};

/// IVA tax code (`codigo`) in `impuesto` and `totalImpuesto`.
const IVA_TAX_CODE: &str = "2";
const CURRENCY: &str = "DOLAR";

/// Identity fields the lifecycle manager assigns before assembly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvoiceHeader {
    pub environment: Environment,
    pub emission_type: EmissionType,
    pub access_key: AccessKey,
    pub sequential: i64,
}

/// Builds the unsigned invoice document for `sale`.
///
/// The sale is reconciled first; a mismatch is a `Validation` error and no
/// document is produced.
pub fn build_invoice_xml(header: &InvoiceHeader, sale: &Sale) -> ResultEngine<String> {
    sale.reconcile()?;

    let issuer = &sale.issuer;
    let buyer = &sale.buyer;
    let mut w = XmlWriter::new();

    w.raw("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    w.raw("<factura id=\"comprobante\" version=\"2.0.0\">\n");

    w.open("infoTributaria");
    w.code("ambiente", header.environment.code());
    w.code("tipoEmision", header.emission_type.code());
    w.text("razonSocial", &issuer.legal_name);
    if let Some(trade_name) = non_blank(issuer.trade_name.as_deref()) {
        w.text("nombreComercial", trade_name);
    }
    w.code("ruc", &issuer.ruc);
    w.code("claveAcceso", header.access_key.as_str());
    w.code("codDoc", INVOICE_DOCUMENT_TYPE);
    w.code("estab", &issuer.establishment);
    w.code("ptoEmi", &issuer.emission_point);
    w.code("secuencial", &format!("{:09}", header.sequential));
    w.text("dirMatriz", &issuer.head_office_address);
    if let Some(legend) = non_blank(issuer.rimpe_legend.as_deref()) {
        w.text("contribuyenteRimpe", legend);
    }
    w.close("infoTributaria");

    w.open("infoFactura");
    w.code(
        "fechaEmision",
        &sale.emission_date.format("%d/%m/%Y").to_string(),
    );
    w.text("dirEstablecimiento", &issuer.establishment_address);
    w.code(
        "obligadoContabilidad",
        if issuer.accounting_required { "SI" } else { "NO" },
    );
    w.code(
        "tipoIdentificacionComprador",
        buyer.identification_type.code(),
    );
    w.text("razonSocialComprador", &buyer.name);
    w.text("identificacionComprador", &buyer.identification);
    if let Some(address) = non_blank(buyer.address.as_deref()) {
        w.text("direccionComprador", address);
    }
    w.money("totalSinImpuestos", sale.subtotal - sale.discount);
    w.money("totalDescuento", sale.discount);

    w.open("totalConImpuestos");
    for (rate, (base, value)) in grouped_taxes(sale) {
        w.open("totalImpuesto");
        w.code("codigo", IVA_TAX_CODE);
        w.code("codigoPorcentaje", rate.code());
        w.money("baseImponible", base);
        w.money("valor", value);
        w.close("totalImpuesto");
    }
    w.close("totalConImpuestos");

    w.money("propina", MoneyCents::ZERO);
    w.money("importeTotal", sale.total);
    w.code("moneda", CURRENCY);

    w.open("pagos");
    for payment in sale.payments_or_default() {
        w.open("pago");
        w.code("formaPago", payment.method.code());
        w.money("total", payment.amount);
        w.close("pago");
    }
    w.close("pagos");
    w.close("infoFactura");

    w.open("detalles");
    for line in &sale.line_items {
        w.open("detalle");
        w.text("codigoPrincipal", &line.code);
        w.text("codigoAuxiliar", &line.source.reference());
        w.text("descripcion", &line.description);
        w.code("cantidad", &format!("{}.000000", line.quantity));
        w.code("precioUnitario", &format!("{}0000", line.unit_price));
        w.money("descuento", line.discount);
        w.money("precioTotalSinImpuesto", line.net());
        w.open("impuestos");
        w.open("impuesto");
        w.code("codigo", IVA_TAX_CODE);
        w.code("codigoPorcentaje", line.tax_rate.code());
        w.code("tarifa", &line.tax_rate.percent_label());
        w.money("baseImponible", line.net());
        w.money("valor", line.tax());
        w.close("impuesto");
        w.close("impuestos");
        w.close("detalle");
    }
    w.close("detalles");

    if let Some(email) = non_blank(buyer.email.as_deref()) {
        w.open("infoAdicional");
        w.field("Email", email);
        w.close("infoAdicional");
    }

    w.raw("</factura>");
    Ok(w.finish())
}

/// Taxable base and tax value per rate, ordered by rate code.
fn grouped_taxes(sale: &Sale) -> BTreeMap<TaxRate, (MoneyCents, MoneyCents)> {
    let mut groups: BTreeMap<TaxRate, (MoneyCents, MoneyCents)> = BTreeMap::new();
    for line in &sale.line_items {
        let entry = groups.entry(line.tax_rate).or_default();
        entry.0 += line.net();
        entry.1 += line.tax();
    }
    groups
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

struct XmlWriter {
    out: String,
    depth: usize,
}

impl XmlWriter {
    fn new() -> Self {
        Self {
            out: String::with_capacity(8192),
            depth: 1,
        }
    }

    fn raw(&mut self, s: &str) {
        self.out.push_str(s);
    }

    fn indent(&mut self) {
        for _ in 0..self.depth {
            self.out.push_str("  ");
        }
    }

    fn open(&mut self, tag: &str) {
        self.indent();
        self.out.push('<');
        self.out.push_str(tag);
        self.out.push_str(">\n");
        self.depth += 1;
    }

    fn close(&mut self, tag: &str) {
        self.depth = self.depth.saturating_sub(1);
        self.indent();
        self.out.push_str("</");
        self.out.push_str(tag);
        self.out.push_str(">\n");
    }

    /// Element whose value is already a code or number.
    fn code(&mut self, tag: &str, value: &str) {
        self.indent();
        self.out.push_str(&format!("<{tag}>{value}</{tag}>\n"));
    }

    /// Element carrying free text.
    fn text(&mut self, tag: &str, value: &str) {
        let escaped = escape_text(value);
        self.code(tag, &escaped);
    }

    fn money(&mut self, tag: &str, value: MoneyCents) {
        self.code(tag, &value.to_string());
    }

    fn field(&mut self, name: &str, value: &str) {
        self.indent();
        self.out.push_str(&format!(
            "<campoAdicional nombre=\"{}\">{}</campoAdicional>\n",
            escape_text(name),
            escape_text(value)
        ));
    }

    fn finish(self) -> String {
        self.out
    }
}

/// NFC-normalizes, strips control characters, folds typographic punctuation,
/// collapses whitespace and escapes the XML metacharacters.
pub fn escape_text(value: &str) -> String {
    let mut folded = String::with_capacity(value.len());
    for ch in value.nfc() {
        match ch {
            '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}' => folded.push('\''),
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{201F}' => folded.push('"'),
            '\u{2013}' | '\u{2014}' | '\u{2015}' => folded.push('-'),
            '\u{2026}' => folded.push_str("..."),
            '\u{00A0}' | '\t' | '\n' | '\r' => folded.push(' '),
            '\u{00AD}' => {}
            c if c.is_control() => {}
            c => folded.push(c),
        }
    }

    let mut out = String::with_capacity(folded.len());
    for word in folded.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        for ch in word.chars() {
            match ch {
                '&' => out.push_str("&amp;"),
                '<' => out.push_str("&lt;"),
                '>' => out.push_str("&gt;"),
                '"' => out.push_str("&quot;"),
                '\'' => out.push_str("&apos;"),
                c => out.push(c),
            }
        }
    }
    out
}
