use rand::Rng;

/// Two random printable ASCII bytes embedded in every probe argument
/// template (`arg<cookie>_...`). A call-probe payload that lacks the
/// cookie is discarded by the decoder — this is what stops a monitored
/// process from spoofing probe output via a string argument of its own
/// (e.g. `arg0_str="fake_cookie_payload"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cookie([u8; 2]);

const PRINTABLE_LO: u8 = b'!';
const PRINTABLE_HI: u8 = b'~';

impl Cookie {
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let a = rng.gen_range(PRINTABLE_LO..=PRINTABLE_HI);
        let b = rng.gen_range(PRINTABLE_LO..=PRINTABLE_HI);
        Cookie([a, b])
    }

    pub fn as_str(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }

    pub fn marker(&self) -> String {
        format!("arg{}_", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_bytes_are_printable() {
        for _ in 0..100 {
            let c = Cookie::generate();
            for b in c.0 {
                assert!((PRINTABLE_LO..=PRINTABLE_HI).contains(&b));
            }
        }
    }

    #[test]
    fn marker_wraps_cookie() {
        let c = Cookie([b'x', b'y']);
        assert_eq!(c.marker(), "argxy_");
    }
}
