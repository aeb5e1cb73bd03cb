// Run configuration (spec §2.3, §6): command-line flags only — this
// process has no persisted state across invocations, unlike the reference
// codebase's JSON-backed `Config`, since every flag here controls a
// from-scratch hardware bring-up rather than a user's saved preferences.

use crate::compiler::PacingHw;

#[derive(Debug, Clone)]
pub struct Config {
    pub amplitude: f64,
    pub frequency_mhz: f64,
    pub clock_div: u32,
    pub mash: i32,
    pub rc_seconds: f64,
    pub timeout: i32,
    pub pacing: PacingHw,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            amplitude: 0.9,
            frequency_mhz: 0.0,
            clock_div: 0,
            mash: 3,
            rc_seconds: 4700.0 * 0.000_001,
            timeout: -1,
            pacing: PacingHw::Pwm,
        }
    }
}

pub const HELP_TEXT: &str = "\
Options:
  --amplitude=<n>     Signal amplitude (0 .. 1]
  --clock-div=<n>     Fractional divisor for carrier [4096 .. 16773120]
                      Note: frequency = 500 MHz / (clock-div / 4096)
  --frequency=<f>     Carrier frequency, in MHz [0.125 .. 500]
                      Note: this is overridden by clock-div
  --help              Show this help
  --mash=<n>          Set number of MASH stages [0 .. 3]
  --pcm               Use PCM clock instead of PWM clock for signal generation
  --rc=<f>            Set signal filter RC value (s)
  --timeout=<n>       Number of zeros before switching off. 0 for infinite.
";

pub enum ParsedArgs {
    Run(Config),
    Help,
}

impl Config {
    /// Manual flag parser — no argument-parsing crate in the dependency
    /// tree, matching the reference codebase's own CLI surfaces.
    pub fn parse(args: impl Iterator<Item = String>) -> Result<ParsedArgs, String> {
        let mut config = Config::default();
        let mut args = args.skip(1).peekable();

        while let Some(arg) = args.next() {
            let (flag, inline_value) = match arg.split_once('=') {
                Some((f, v)) => (f.to_string(), Some(v.to_string())),
                None => (arg.clone(), None),
            };

            let mut value_of = |flag: &str| -> Result<String, String> {
                if let Some(v) = inline_value.clone() {
                    return Ok(v);
                }
                args.next()
                    .ok_or_else(|| format!("{flag} requires a value"))
            };

            match flag.as_str() {
                "--amplitude" => {
                    config.amplitude = value_of("--amplitude")?
                        .parse()
                        .map_err(|_| "invalid --amplitude value".to_string())?;
                }
                "--clock-div" => {
                    config.clock_div = value_of("--clock-div")?
                        .parse()
                        .map_err(|_| "invalid --clock-div value".to_string())?;
                }
                "--frequency" => {
                    config.frequency_mhz = value_of("--frequency")?
                        .parse()
                        .map_err(|_| "invalid --frequency value".to_string())?;
                }
                "--help" => return Ok(ParsedArgs::Help),
                "--mash" => {
                    config.mash = value_of("--mash")?
                        .parse()
                        .map_err(|_| "invalid --mash value".to_string())?;
                }
                "--pcm" => config.pacing = PacingHw::Pcm,
                "--rc" => {
                    config.rc_seconds = value_of("--rc")?
                        .parse()
                        .map_err(|_| "invalid --rc value".to_string())?;
                }
                "--timeout" => {
                    config.timeout = value_of("--timeout")?
                        .parse()
                        .map_err(|_| "invalid --timeout value".to_string())?;
                }
                other => return Err(format!("unrecognized option: {other}")),
            }
        }
        Ok(ParsedArgs::Run(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_reference_defaults() {
        let c = Config::default();
        assert_eq!(c.amplitude, 0.9);
        assert_eq!(c.timeout, -1);
        assert_eq!(c.mash, 3);
    }

    #[test]
    fn parses_equals_and_space_separated_flags() {
        let argv = ["psk31", "--amplitude=0.5", "--timeout", "30", "--pcm"]
            .iter()
            .map(|s| s.to_string());
        match Config::parse(argv).unwrap() {
            ParsedArgs::Run(c) => {
                assert_eq!(c.amplitude, 0.5);
                assert_eq!(c.timeout, 30);
                assert!(matches!(c.pacing, PacingHw::Pcm));
            }
            ParsedArgs::Help => panic!("expected Run"),
        }
    }

    #[test]
    fn help_flag_short_circuits_parsing() {
        let argv = ["psk31", "--help"].iter().map(|s| s.to_string());
        assert!(matches!(Config::parse(argv).unwrap(), ParsedArgs::Help));
    }

    #[test]
    fn unknown_flag_is_rejected() {
        let argv = ["psk31", "--bogus"].iter().map(|s| s.to_string());
        assert!(Config::parse(argv).is_err());
    }
}
