use std::fmt;
use std::str::FromStr;

macro_rules! aws_regions {
    ($($variant:ident => $code:literal,)+) => {
        /// AWS regions offering Amazon Managed Service for Prometheus-compatible signing.
        ///
        /// See https://docs.aws.amazon.com/general/latest/gr/rande.html
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum AwsRegion {
            $($variant,)+
        }

        impl AwsRegion {
            pub const ALL: &'static [AwsRegion] = &[$(AwsRegion::$variant,)+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(AwsRegion::$variant => $code,)+
                }
            }
        }
    };
}

aws_regions! {
    UsEast1 => "us-east-1",
    UsEast2 => "us-east-2",
    UsWest1 => "us-west-1",
    UsWest2 => "us-west-2",
    AfSouth1 => "af-south-1",
    ApEast1 => "ap-east-1",
    ApEast2 => "ap-east-2",
    ApSouth1 => "ap-south-1",
    ApSouth2 => "ap-south-2",
    ApNortheast1 => "ap-northeast-1",
    ApNortheast2 => "ap-northeast-2",
    ApNortheast3 => "ap-northeast-3",
    ApSoutheast1 => "ap-southeast-1",
    ApSoutheast2 => "ap-southeast-2",
    ApSoutheast3 => "ap-southeast-3",
    ApSoutheast4 => "ap-southeast-4",
    ApSoutheast5 => "ap-southeast-5",
    ApSoutheast7 => "ap-southeast-7",
    CaCentral1 => "ca-central-1",
    CaWest1 => "ca-west-1",
    EuCentral1 => "eu-central-1",
    EuCentral2 => "eu-central-2",
    EuWest1 => "eu-west-1",
    EuWest2 => "eu-west-2",
    EuWest3 => "eu-west-3",
    EuNorth1 => "eu-north-1",
    EuSouth1 => "eu-south-1",
    EuSouth2 => "eu-south-2",
    IlCentral1 => "il-central-1",
    MxCentral1 => "mx-central-1",
    MeSouth1 => "me-south-1",
    MeCentral1 => "me-central-1",
    SaEast1 => "sa-east-1",
    UsGovEast1 => "us-gov-east-1",
    UsGovWest1 => "us-gov-west-1",
}

impl fmt::Display for AwsRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AwsRegion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        AwsRegion::ALL
            .iter()
            .copied()
            .find(|r| r.as_str() == wanted)
            .ok_or_else(|| {
                format!(
                    "Invalid AWS region: '{}'. See https://docs.aws.amazon.com/general/latest/gr/rande.html for valid regions",
                    s
                )
            })
    }
}
