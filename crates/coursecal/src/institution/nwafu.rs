//! Northwest A&F University (newehall.nwafu.edu.cn).
//!
//! Authentication goes through the university CAS server. The login page
//! carries two hidden inputs, `pwdEncryptSalt` and `execution`; the password
//! is submitted as `base64(AES-128-CBC(key = salt, iv = random, random64 + password))`.
//! A successful login answers with a 302 to the service ticket URL.
//!
//! Timetable data comes from the ehall `jwapp` endpoints, which return rows in
//! the bitstring shape: `SKZC` (week attendance), `SKXQ` (weekday),
//! `KSJC`/`JSJC` (start/end period) and `XNXQDM` (term code).

use std::sync::{Arc, LazyLock};

use aes::cipher::{block_padding::Pkcs7, BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::NaiveDate;
use rand::Rng;
use regex::Regex;
use reqwest::blocking::Client;
use reqwest::cookie::Jar;
use reqwest::header::LOCATION;
use reqwest::StatusCode;
use scraper::{Html, Selector};
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use super::{
    build_client, AdapterSettings, Credentials, FallbackText, InstitutionAdapter,
    InstitutionProfile,
};
use crate::error::{Result, ScheduleError};
use crate::schedule::{RawExamRecord, RawScheduleRecord, RecordSchema, WeekShape};
use crate::timetable::{PeriodTable, SeasonRule, Slot};

const CAS_URL: &str = "https://authserver.nwafu.edu.cn/authserver/login";
const SERVICE_URL: &str = "https://newehall.nwafu.edu.cn/login?service=https://newehall.nwafu.edu.cn/ywtb-portal/Lite/index.html?browser=no#/cusHall";
const EHALL_URL: &str = "https://newehall.nwafu.edu.cn";

/// Entry page of the timetable app; visiting it binds the CAS session to jwapp.
const APP_ENTRY_PATH: &str = "/jwapp/sys/wdkb/*default/index.do";
const CURRENT_TERM_PATH: &str = "/jwapp/sys/wdkb/modules/jshkcb/dqxnxq.do";
const TERM_CALENDAR_PATH: &str = "/jwapp/sys/wdkb/modules/jshkcb/cxjcs.do";
const COURSE_TABLE_PATH: &str = "/jwapp/sys/wdkb/modules/xskcb/xskcb.do";
const EXAM_PATH: &str = "/jwapp/sys/studentWdksapApp/modules/wdksap/wdksap.do";

/// Alphabet the CAS login script draws its random prefix and IV from.
const RANDOM_CHARS: &[u8] = b"ABCDEFGHJKMNPQRSTWXYZabcdefhijkmnprstwxyz2345678";
const PREFIX_LEN: usize = 64;
const IV_LEN: usize = 16;

const WINTER: &[Slot] = &[
    (8, 0, 8, 45),
    (8, 55, 9, 40),
    (10, 10, 10, 55),
    (11, 5, 11, 50),
    (14, 0, 14, 45),
    (14, 55, 15, 40),
    (16, 10, 16, 55),
    (17, 5, 17, 50),
    (19, 0, 19, 45),
    (19, 55, 20, 40),
    (20, 50, 21, 35),
];

const SUMMER: &[Slot] = &[
    (8, 0, 8, 45),
    (8, 55, 9, 40),
    (10, 10, 10, 55),
    (11, 5, 11, 50),
    (14, 30, 15, 15),
    (15, 25, 16, 10),
    (16, 40, 17, 25),
    (17, 35, 18, 20),
    (19, 30, 20, 15),
    (20, 25, 21, 10),
    (21, 20, 22, 5),
];

pub static PROFILE: InstitutionProfile = InstitutionProfile {
    key: "nwafu",
    display_name: "西北农林科技大学",
    timezone: chrono_tz::Asia::Shanghai,
    periods: PeriodTable::new(WINTER, SUMMER),
    season_rule: SeasonRule::OddIsWinter,
    schema: RecordSchema {
        lesson_id: &["JXBID", "KCH"],
        term_code: &["XNXQDM"],
        weeks: &["SKZC"],
        week_shape: WeekShape::Bitstring,
        day_of_week: &["SKXQ", "XQJ"],
        start_period: &["KSJC"],
        end_period: &["JSJC"],
        course_name: &["KCM", "KCMC"],
        instructor: &["SKJS", "JSXM"],
        room: &["JASMC", "JASDM"],
        clock_start: &[],
        clock_end: &[],
    },
    fallbacks: FallbackText {
        course: "未知课程",
        instructor: "未知教师",
        location: "未知地点",
        seat: "未知座位",
    },
};

static SALT_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("input#pwdEncryptSalt").unwrap());
static EXECUTION_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("input#execution").unwrap());
static EXAM_TIME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{4}-\d{2}-\d{2})\s+(\d{1,2}:\d{2})\s*[-~至]\s*(\d{1,2}:\d{2})").unwrap()
});

/// Hidden inputs of the CAS login form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginForm {
    pub salt: String,
    pub execution: String,
}

pub struct NwafuAdapter {
    /// Does not follow redirects; the CAS answer is judged by its status
    login_client: Client,
    client: Client,
    credentials: Credentials,
    term_code: Option<String>,
}

pub fn create(
    credentials: Credentials,
    settings: &AdapterSettings,
) -> Result<Box<dyn InstitutionAdapter>> {
    Ok(Box::new(NwafuAdapter::new(credentials, settings)?))
}

impl NwafuAdapter {
    pub fn new(credentials: Credentials, settings: &AdapterSettings) -> Result<Self> {
        // the CAS host serves an incomplete certificate chain
        let jar = Arc::new(Jar::default());
        Ok(Self {
            login_client: build_client(settings, false, true, jar.clone())?,
            client: build_client(settings, true, true, jar)?,
            credentials,
            term_code: None,
        })
    }

    fn post_jwapp(&self, path: &str, form: &[(&str, &str)]) -> Result<Value> {
        let value = self
            .client
            .post(format!("{}{}", EHALL_URL, path))
            .form(form)
            .send()?
            .error_for_status()?
            .json()?;
        Ok(value)
    }

    fn fetch_term_code(&mut self) -> Result<String> {
        if let Some(code) = &self.term_code {
            return Ok(code.clone());
        }

        let response = self.post_jwapp(CURRENT_TERM_PATH, &[])?;
        let code = datas_rows(&response, "dqxnxq")
            .first()
            .and_then(|row| row.get("DM"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ScheduleError::UnexpectedResponse {
                message: "Current term response has no term code".to_string(),
            })?;

        debug!(term = %code, "Resolved current term");
        self.term_code = Some(code.clone());
        Ok(code)
    }
}

impl InstitutionAdapter for NwafuAdapter {
    fn profile(&self) -> &'static InstitutionProfile {
        &PROFILE
    }

    fn authenticate(&mut self) -> Result<bool> {
        let page = self
            .login_client
            .get(CAS_URL)
            .query(&[("service", SERVICE_URL)])
            .send()?
            .error_for_status()?
            .text()?;
        let form = parse_login_form(&page).ok_or_else(|| ScheduleError::UnexpectedResponse {
            message: "CAS login page has no pwdEncryptSalt/execution inputs".to_string(),
        })?;

        let password = encrypt_password(&self.credentials.password, &form.salt);
        let response = self
            .login_client
            .post(CAS_URL)
            .form(&[
                ("username", self.credentials.username.as_str()),
                ("password", password.as_str()),
                ("_eventId", "submit"),
                ("cllt", "userNameLogin"),
                ("execution", form.execution.as_str()),
            ])
            .send()?;

        if response.status() != StatusCode::FOUND {
            warn!(
                username = %self.credentials.username,
                status = %response.status(),
                "CAS rejected credentials"
            );
            return Ok(false);
        }

        // Redeem the service ticket, then open the timetable app
        if let Some(location) = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
        {
            let ticket_url = Url::parse(CAS_URL)?.join(location)?;
            self.client.get(ticket_url).send()?;
        }
        self.client
            .get(format!("{}{}", EHALL_URL, APP_ENTRY_PATH))
            .send()?
            .error_for_status()?;

        info!(username = %self.credentials.username, "CAS login succeeded");
        Ok(true)
    }

    fn fetch_term_anchor_date(&mut self) -> Result<Option<NaiveDate>> {
        let term = self.fetch_term_code()?;
        let (year, semester) = split_term_code(&term)?;
        let response = self.post_jwapp(TERM_CALENDAR_PATH, &[("XN", year), ("XQ", semester)])?;
        Ok(parse_term_start(&response))
    }

    fn fetch_raw_course_records(&mut self) -> Result<Vec<RawScheduleRecord>> {
        let term = self.fetch_term_code()?;
        let response = self.post_jwapp(COURSE_TABLE_PATH, &[("XNXQDM", term.as_str())])?;
        let rows: Vec<RawScheduleRecord> = datas_rows(&response, "xskcb")
            .iter()
            .cloned()
            .filter_map(RawScheduleRecord::from_value)
            .collect();

        info!(term = %term, rows = rows.len(), "Fetched course rows");
        Ok(rows)
    }

    fn fetch_raw_exam_records(&mut self) -> Result<Vec<RawExamRecord>> {
        let term = self.fetch_term_code()?;
        let response = self.post_jwapp(EXAM_PATH, &[("XNXQDM", term.as_str())])?;
        Ok(parse_exam_rows(&response))
    }

    fn current_term_code(&self) -> Option<&str> {
        self.term_code.as_deref()
    }
}

pub fn parse_login_form(html: &str) -> Option<LoginForm> {
    let document = Html::parse_document(html);
    let value = |selector: &Selector| {
        document
            .select(selector)
            .next()
            .and_then(|input| input.value().attr("value"))
            .map(|v| v.trim().to_string())
    };
    Some(LoginForm {
        salt: value(&SALT_SELECTOR)?,
        execution: value(&EXECUTION_SELECTOR)?,
    })
}

fn random_string(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| RANDOM_CHARS[rng.gen_range(0..RANDOM_CHARS.len())] as char)
        .collect()
}

/// Encrypts `password` the way the CAS login script does.
///
/// An empty salt means the server expects the plain password; a salt that is
/// not a valid AES-128 key falls back to it as well.
pub fn encrypt_password(password: &str, salt: &str) -> String {
    let salt = salt.trim();
    if salt.is_empty() {
        return password.to_string();
    }

    let prefix = random_string(PREFIX_LEN);
    let iv = random_string(IV_LEN);
    match encrypt_with(&format!("{}{}", prefix, password), salt, &iv) {
        Some(encrypted) => encrypted,
        None => {
            warn!(salt_len = salt.len(), "Unusable password salt, sending plain password");
            password.to_string()
        }
    }
}

/// `base64(AES-128-CBC/PKCS7(data))`, or `None` if key or IV is not 16 bytes.
pub fn encrypt_with(data: &str, key: &str, iv: &str) -> Option<String> {
    let cipher =
        cbc::Encryptor::<aes::Aes128>::new_from_slices(key.as_bytes(), iv.as_bytes()).ok()?;
    let encrypted = cipher.encrypt_padded_vec_mut::<Pkcs7>(data.as_bytes());
    Some(STANDARD.encode(encrypted))
}

/// Splits `2023-2024-2` into the academic year and the semester number.
fn split_term_code(term: &str) -> Result<(&str, &str)> {
    term.rsplit_once('-')
        .filter(|(year, semester)| !year.is_empty() && !semester.is_empty())
        .ok_or_else(|| ScheduleError::UnexpectedResponse {
            message: format!("Unrecognized term code: {}", term),
        })
}

/// `datas.{name}.rows` of a jwapp response, or an empty slice.
fn datas_rows<'a>(response: &'a Value, name: &str) -> &'a [Value] {
    response
        .get("datas")
        .and_then(|d| d.get(name))
        .and_then(|d| d.get("rows"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// First day of the term from the term-calendar response (`XQKSRQ`).
pub fn parse_term_start(response: &Value) -> Option<NaiveDate> {
    let text = datas_rows(response, "cxjcs")
        .first()?
        .get("XQKSRQ")?
        .as_str()?;
    NaiveDate::parse_from_str(text.get(..10)?, "%Y-%m-%d").ok()
}

/// Rewrites portal exam times such as `2024-06-20 14:00-16:00(星期四)` to
/// `2024-06-20 14:00~16:00`. Unrecognized text is returned trimmed.
pub fn canonical_exam_time(text: &str) -> String {
    match EXAM_TIME_REGEX.captures(text) {
        Some(c) => format!("{} {}~{}", &c[1], &c[2], &c[3]),
        None => text.trim().to_string(),
    }
}

pub fn parse_exam_rows(response: &Value) -> Vec<RawExamRecord> {
    let field = |row: &Value, name: &str| {
        row.get(name)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    datas_rows(response, "wdksap")
        .iter()
        .map(|row| {
            let time_text = field(row, "KSSJMS").unwrap_or_default();
            RawExamRecord {
                course_name: field(row, "KCM").unwrap_or_default(),
                canonical_time_text: Some(canonical_exam_time(&time_text)),
                raw_time_text: time_text,
                room: field(row, "JASMC"),
                seat_number: field(row, "ZWH"),
            }
        })
        .collect()
}
