//! GeoIP 보강 스테이지
//!
//! `extracted[source]`의 IP 주소를 조회해 `geoip_*` 키를 추출 맵에 기록합니다.
//! 조회는 [`GeoIpLookup`] trait 뒤에 있으며, 운영 구현은 MaxMind 데이터베이스입니다.

use std::net::IpAddr;
use std::path::Path;

use logweave_core::stage_config::{GeoIpDbType, GeoIpStageConfig};
use maxminddb::{Reader, geoip2};
use serde_json::{Number, Value};
use tracing::{debug, info};

use super::{Processor, soft_failure};
use crate::entry::ProcessingEntry;
use crate::error::LogPipelineError;

/// 조회 결과. 채워진 필드만 추출 맵에 기록됩니다.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeoIpRecord {
    pub city_name: Option<String>,
    pub country_name: Option<String>,
    pub country_code: Option<String>,
    pub continent_name: Option<String>,
    pub continent_code: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub postal_code: Option<String>,
    pub timezone: Option<String>,
    pub subdivision_name: Option<String>,
    pub subdivision_code: Option<String>,
    pub autonomous_system_number: Option<u32>,
    pub autonomous_system_organization: Option<String>,
}

impl GeoIpRecord {
    /// `(추출 맵 키, 값)` 목록
    pub fn fields(&self) -> Vec<(&'static str, Value)> {
        let text = |key: &'static str, v: &Option<String>| {
            v.as_ref().map(|s| (key, Value::String(s.clone())))
        };
        let float = |key: &'static str, v: Option<f64>| {
            v.and_then(Number::from_f64).map(|n| (key, Value::Number(n)))
        };

        [
            text("geoip_city_name", &self.city_name),
            text("geoip_country_name", &self.country_name),
            text("geoip_country_code", &self.country_code),
            text("geoip_continent_name", &self.continent_name),
            text("geoip_continent_code", &self.continent_code),
            float("geoip_location_latitude", self.latitude),
            float("geoip_location_longitude", self.longitude),
            text("geoip_postal_code", &self.postal_code),
            text("geoip_timezone", &self.timezone),
            text("geoip_subdivision_name", &self.subdivision_name),
            text("geoip_subdivision_code", &self.subdivision_code),
            self.autonomous_system_number
                .map(|n| ("geoip_autonomous_system_number", Value::from(n))),
            text(
                "geoip_autonomous_system_organization",
                &self.autonomous_system_organization,
            ),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// IP 주소 조회기
pub trait GeoIpLookup: Send + Sync {
    /// 조회 실패나 미등록 주소는 `None`.
    fn lookup(&self, ip: IpAddr) -> Option<GeoIpRecord>;
}

/// MaxMind 데이터베이스 조회기
pub struct MaxMindLookup {
    reader: Reader<Vec<u8>>,
    db_type: GeoIpDbType,
}

impl MaxMindLookup {
    /// 데이터베이스 파일을 엽니다.
    pub fn open(path: impl AsRef<Path>, db_type: GeoIpDbType) -> Result<Self, LogPipelineError> {
        let path = path.as_ref();
        let reader = Reader::open_readfile(path).map_err(|e| {
            LogPipelineError::GeoIp(format!("failed to open '{}': {e}", path.display()))
        })?;
        info!(
            path = %path.display(),
            database_type = %reader.metadata.database_type,
            "geoip database opened"
        );
        Ok(Self { reader, db_type })
    }
}

fn english(names: &Option<std::collections::BTreeMap<&str, &str>>) -> Option<String> {
    names
        .as_ref()
        .and_then(|n| n.get("en"))
        .map(|s| (*s).to_owned())
}

impl GeoIpLookup for MaxMindLookup {
    fn lookup(&self, ip: IpAddr) -> Option<GeoIpRecord> {
        match self.db_type {
            GeoIpDbType::City => {
                let city: geoip2::City = self.reader.lookup(ip).ok()?;
                let subdivision = city.subdivisions.as_ref().and_then(|s| s.first());
                Some(GeoIpRecord {
                    city_name: city.city.as_ref().and_then(|c| english(&c.names)),
                    country_name: city.country.as_ref().and_then(|c| english(&c.names)),
                    country_code: city
                        .country
                        .as_ref()
                        .and_then(|c| c.iso_code)
                        .map(str::to_owned),
                    continent_name: city.continent.as_ref().and_then(|c| english(&c.names)),
                    continent_code: city
                        .continent
                        .as_ref()
                        .and_then(|c| c.code)
                        .map(str::to_owned),
                    latitude: city.location.as_ref().and_then(|l| l.latitude),
                    longitude: city.location.as_ref().and_then(|l| l.longitude),
                    postal_code: city
                        .postal
                        .as_ref()
                        .and_then(|p| p.code)
                        .map(str::to_owned),
                    timezone: city
                        .location
                        .as_ref()
                        .and_then(|l| l.time_zone)
                        .map(str::to_owned),
                    subdivision_name: subdivision.and_then(|s| english(&s.names)),
                    subdivision_code: subdivision.and_then(|s| s.iso_code).map(str::to_owned),
                    ..Default::default()
                })
            }
            GeoIpDbType::Country => {
                let country: geoip2::Country = self.reader.lookup(ip).ok()?;
                Some(GeoIpRecord {
                    country_name: country.country.as_ref().and_then(|c| english(&c.names)),
                    country_code: country
                        .country
                        .as_ref()
                        .and_then(|c| c.iso_code)
                        .map(str::to_owned),
                    continent_name: country.continent.as_ref().and_then(|c| english(&c.names)),
                    continent_code: country
                        .continent
                        .as_ref()
                        .and_then(|c| c.code)
                        .map(str::to_owned),
                    ..Default::default()
                })
            }
            GeoIpDbType::Asn => {
                let asn: geoip2::Asn = self.reader.lookup(ip).ok()?;
                Some(GeoIpRecord {
                    autonomous_system_number: asn.autonomous_system_number,
                    autonomous_system_organization: asn
                        .autonomous_system_organization
                        .map(str::to_owned),
                    ..Default::default()
                })
            }
        }
    }
}

/// GeoIP 보강 스테이지
pub struct GeoIpStage {
    source: String,
    lookup: Box<dyn GeoIpLookup>,
}

impl GeoIpStage {
    /// 설정의 MaxMind 데이터베이스를 열어 스테이지를 생성합니다.
    pub fn open(config: &GeoIpStageConfig) -> Result<Self, LogPipelineError> {
        if config.db.is_empty() {
            return Err(LogPipelineError::stage("geoip", "db is required"));
        }
        let lookup = MaxMindLookup::open(&config.db, config.db_type)?;
        Self::with_lookup(&config.source, Box::new(lookup))
    }

    /// 임의의 조회기로 스테이지를 생성합니다.
    pub fn with_lookup(
        source: &str,
        lookup: Box<dyn GeoIpLookup>,
    ) -> Result<Self, LogPipelineError> {
        if source.is_empty() {
            return Err(LogPipelineError::stage("geoip", "source is required"));
        }
        Ok(Self {
            source: source.to_owned(),
            lookup,
        })
    }
}

impl Processor for GeoIpStage {
    fn name(&self) -> &'static str {
        "geoip"
    }

    fn process(&mut self, entry: &mut ProcessingEntry) {
        let Some(raw) = entry.extracted_string(&self.source) else {
            return;
        };
        let ip: IpAddr = match raw.trim().parse() {
            Ok(ip) => ip,
            Err(_) => {
                debug!(source = %self.source, value = %raw, "not an ip address");
                soft_failure("geoip");
                return;
            }
        };
        let Some(record) = self.lookup.lookup(ip) else {
            debug!(%ip, "geoip lookup miss");
            soft_failure("geoip");
            return;
        };
        for (key, value) in record.fields() {
            entry.extracted.insert(key.to_owned(), value);
        }
    }
}
