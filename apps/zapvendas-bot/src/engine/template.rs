use std::collections::BTreeMap;

/// Substitutes literal `{key}` tokens with values from `vars`.
/// Unmatched tokens are left untouched so flow authors see their typos.
pub fn render(template: &str, vars: &BTreeMap<String, String>) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{}}}", key), value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_known_keys() {
        let mut vars = BTreeMap::new();
        vars.insert("product_name".to_string(), "Plano Mensal".to_string());
        vars.insert("days_until_expiry".to_string(), "3".to_string());

        let rendered = render(
            "Sua assinatura de {product_name} expira em {days_until_expiry} dias.",
            &vars,
        );
        assert_eq!(rendered, "Sua assinatura de Plano Mensal expira em 3 dias.");
    }

    #[test]
    fn leaves_unknown_tokens_as_is() {
        let vars = BTreeMap::new();
        assert_eq!(render("Olá {name}!", &vars), "Olá {name}!");
    }

    #[test]
    fn repeated_tokens_all_substitute() {
        let mut vars = BTreeMap::new();
        vars.insert("x".to_string(), "1".to_string());
        assert_eq!(render("{x} e {x}", &vars), "1 e 1");
    }
}
