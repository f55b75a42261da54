//! Kubernetes resource quantity parsing (`250m`, `1.5`, `128Mi`, `1e3`, ...).

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

/// Value of a quantity in base units (cores for CPU, bytes for memory).
pub fn parse_quantity(q: &Quantity) -> Option<f64> {
    parse_str(&q.0)
}

pub fn cpu_millicores(q: &Quantity) -> Option<f64> {
    parse_quantity(q).map(|v| v * 1000.0)
}

pub fn bytes(q: &Quantity) -> Option<f64> {
    parse_quantity(q)
}

fn parse_str(s: &str) -> Option<f64> {
    let s = s.trim();
    let split = s
        .char_indices()
        .find(|(i, c)| !(c.is_ascii_digit() || *c == '.' || ((*c == '+' || *c == '-') && *i == 0)))
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    let (num, suffix) = s.split_at(split);
    let base: f64 = num.parse().ok()?;
    Some(base * multiplier(suffix)?)
}

fn multiplier(suffix: &str) -> Option<f64> {
    let m = match suffix {
        "" => 1.0,
        "n" => 1e-9,
        "u" => 1e-6,
        "m" => 1e-3,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        "Ki" => 1024f64,
        "Mi" => 1024f64.powi(2),
        "Gi" => 1024f64.powi(3),
        "Ti" => 1024f64.powi(4),
        "Pi" => 1024f64.powi(5),
        "Ei" => 1024f64.powi(6),
        other => {
            let exp = other.strip_prefix('e').or_else(|| other.strip_prefix('E'))?;
            10f64.powi(exp.parse::<i32>().ok()?)
        }
    };
    Some(m)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(s: &str) -> Quantity {
        Quantity(s.to_string())
    }

    #[test]
    fn cpu_forms() {
        assert_eq!(cpu_millicores(&q("250m")), Some(250.0));
        assert_eq!(cpu_millicores(&q("2")), Some(2000.0));
        assert_eq!(cpu_millicores(&q("0.5")), Some(500.0));
        assert_eq!(cpu_millicores(&q("100000u")).map(|v| v.round()), Some(100.0));
    }

    #[test]
    fn memory_forms() {
        assert_eq!(bytes(&q("128Mi")), Some(128.0 * 1024.0 * 1024.0));
        assert_eq!(bytes(&q("1Gi")), Some(1024.0 * 1024.0 * 1024.0));
        assert_eq!(bytes(&q("1G")), Some(1e9));
        assert_eq!(bytes(&q("512k")), Some(512_000.0));
        assert_eq!(bytes(&q("1e3")), Some(1000.0));
        assert_eq!(bytes(&q("1E")), Some(1e18));
        assert_eq!(bytes(&q("2E3")), Some(2000.0));
    }

    #[test]
    fn garbage_is_none() {
        assert_eq!(parse_quantity(&q("")), None);
        assert_eq!(parse_quantity(&q("abc")), None);
        assert_eq!(parse_quantity(&q("12Xi")), None);
        assert_eq!(parse_quantity(&q("1.2.3")), None);
    }
}
