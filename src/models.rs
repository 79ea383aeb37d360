//! Registry rows and create payloads.
//!
//! JSON field names follow the column names of the existing schema
//! (`CountryID`, `CitizenName`, ...), including its historical spellings
//! such as `DistricID` and `SeatDescption`.

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::db::SqlValue;
use crate::errors::AppError;

// ============ Database Models ============

/// A country, the root of the hierarchy.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Country {
    #[sqlx(rename = "CountryID")]
    #[serde(rename = "CountryID")]
    pub country_id: i32,
    #[sqlx(rename = "CountryName")]
    #[serde(rename = "CountryName")]
    pub country_name: String,
    #[sqlx(rename = "Auser")]
    #[serde(rename = "Auser")]
    pub auser: Option<String>,
    #[sqlx(rename = "Muser")]
    #[serde(rename = "Muser")]
    pub muser: Option<String>,
    #[sqlx(rename = "Terminal")]
    #[serde(rename = "Terminal")]
    pub terminal: Option<String>,
}

/// A territory (province/state) inside a country.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Territory {
    #[sqlx(rename = "TerritoryID")]
    #[serde(rename = "TerritoryID")]
    pub territory_id: i32,
    #[sqlx(rename = "CountryID")]
    #[serde(rename = "CountryID")]
    pub country_id: i32,
    #[sqlx(rename = "TerritoryName")]
    #[serde(rename = "TerritoryName")]
    pub territory_name: String,
    #[sqlx(rename = "TerritoryShortName")]
    #[serde(rename = "TerritoryShortName")]
    pub territory_short_name: Option<String>,
    #[sqlx(rename = "Auser")]
    #[serde(rename = "Auser")]
    pub auser: Option<String>,
    #[sqlx(rename = "Muser")]
    #[serde(rename = "Muser")]
    pub muser: Option<String>,
    #[sqlx(rename = "Terminal")]
    #[serde(rename = "Terminal")]
    pub terminal: Option<String>,
}

/// A district inside a territory.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct District {
    #[sqlx(rename = "DistrictID")]
    #[serde(rename = "DistrictID")]
    pub district_id: i32,
    #[sqlx(rename = "CountryID")]
    #[serde(rename = "CountryID")]
    pub country_id: i32,
    #[sqlx(rename = "TerritoryID")]
    #[serde(rename = "TerritoryID")]
    pub territory_id: i32,
    #[sqlx(rename = "DistrictName")]
    #[serde(rename = "DistrictName")]
    pub district_name: String,
    #[sqlx(rename = "Auser")]
    #[serde(rename = "Auser")]
    pub auser: Option<String>,
    #[sqlx(rename = "Muser")]
    #[serde(rename = "Muser")]
    pub muser: Option<String>,
    #[sqlx(rename = "Terminal")]
    #[serde(rename = "Terminal")]
    pub terminal: Option<String>,
}

/// An electoral seat inside a district.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Seat {
    #[sqlx(rename = "SeatID")]
    #[serde(rename = "SeatID")]
    pub seat_id: i32,
    #[sqlx(rename = "CountryID")]
    #[serde(rename = "CountryID")]
    pub country_id: i32,
    #[sqlx(rename = "TerritoryID")]
    #[serde(rename = "TerritoryID")]
    pub territory_id: i32,
    #[sqlx(rename = "DistricID")]
    #[serde(rename = "DistricID")]
    pub district_id: i32,
    #[sqlx(rename = "SeatDescption")]
    #[serde(rename = "SeatDescption")]
    pub seat_description: String,
    #[sqlx(rename = "Auser")]
    #[serde(rename = "Auser")]
    pub auser: Option<String>,
    #[sqlx(rename = "Muser")]
    #[serde(rename = "Muser")]
    pub muser: Option<String>,
    #[sqlx(rename = "Terminal")]
    #[serde(rename = "Terminal")]
    pub terminal: Option<String>,
}

/// A registered citizen, attached to a district and a seat.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Citizen {
    #[sqlx(rename = "CitizenID")]
    #[serde(rename = "CitizenID")]
    pub citizen_id: i32,
    #[sqlx(rename = "CountryID")]
    #[serde(rename = "CountryID")]
    pub country_id: i32,
    #[sqlx(rename = "TerritoryID")]
    #[serde(rename = "TerritoryID")]
    pub territory_id: i32,
    #[sqlx(rename = "DistrictID")]
    #[serde(rename = "DistrictID")]
    pub district_id: i32,
    #[sqlx(rename = "SeatID")]
    #[serde(rename = "SeatID")]
    pub seat_id: i32,
    #[sqlx(rename = "CitizenName")]
    #[serde(rename = "CitizenName")]
    pub citizen_name: String,
    #[sqlx(rename = "NIC")]
    #[serde(rename = "NIC")]
    pub nic: Option<String>,
    #[sqlx(rename = "City")]
    #[serde(rename = "City")]
    pub city: Option<String>,
    #[sqlx(rename = "Address1")]
    #[serde(rename = "Address1")]
    pub address1: Option<String>,
    #[sqlx(rename = "Address2")]
    #[serde(rename = "Address2")]
    pub address2: Option<String>,
    #[sqlx(rename = "DOB")]
    #[serde(rename = "DOB")]
    pub dob: Option<NaiveDate>,
    #[sqlx(rename = "Job")]
    #[serde(rename = "Job")]
    pub job: Option<String>,
    #[sqlx(rename = "Salary")]
    #[serde(rename = "Salary")]
    pub salary: Option<BigDecimal>,
    #[sqlx(rename = "MaritalStatus")]
    #[serde(rename = "MaritalStatus")]
    pub marital_status: Option<String>,
    #[sqlx(rename = "Auser")]
    #[serde(rename = "Auser")]
    pub auser: Option<String>,
    #[sqlx(rename = "Muser")]
    #[serde(rename = "Muser")]
    pub muser: Option<String>,
    #[sqlx(rename = "Terminal")]
    #[serde(rename = "Terminal")]
    pub terminal: Option<String>,
}

// ============ Create Payloads ============

/// Audit columns shared by every create payload.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Audit {
    #[serde(rename = "Auser", default)]
    pub auser: Option<String>,
    #[serde(rename = "Muser", default)]
    pub muser: Option<String>,
    #[serde(rename = "Terminal", default)]
    pub terminal: Option<String>,
}

impl Audit {
    fn params(&self) -> [SqlValue; 3] {
        [
            self.auser.clone().into(),
            self.muser.clone().into(),
            self.terminal.clone().into(),
        ]
    }
}

fn required(field: &str, value: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::BadRequest(format!("{} is required", field)));
    }
    Ok(())
}

fn positive(field: &str, value: i32) -> Result<(), AppError> {
    if value <= 0 {
        return Err(AppError::BadRequest(format!("{} must be a positive id", field)));
    }
    Ok(())
}

/// Body of `POST /countries`. Country ids are assigned by the caller.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NewCountry {
    #[serde(rename = "CountryID")]
    pub country_id: i32,
    #[serde(rename = "CountryName")]
    pub country_name: String,
    #[serde(flatten)]
    pub audit: Audit,
}

impl NewCountry {
    pub fn validate(&self) -> Result<(), AppError> {
        positive("CountryID", self.country_id)?;
        required("CountryName", &self.country_name)
    }

    pub fn params(&self) -> Vec<SqlValue> {
        let mut params: Vec<SqlValue> = vec![self.country_id.into(), self.country_name.clone().into()];
        params.extend(self.audit.params());
        params
    }
}

/// Body of `POST /territories`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NewTerritory {
    #[serde(rename = "CountryID")]
    pub country_id: i32,
    #[serde(rename = "TerritoryName")]
    pub territory_name: String,
    #[serde(rename = "TerritoryShortName", default)]
    pub territory_short_name: Option<String>,
    #[serde(flatten)]
    pub audit: Audit,
}

impl NewTerritory {
    pub fn validate(&self) -> Result<(), AppError> {
        positive("CountryID", self.country_id)?;
        required("TerritoryName", &self.territory_name)
    }

    pub fn params(&self) -> Vec<SqlValue> {
        let mut params: Vec<SqlValue> = vec![
            self.country_id.into(),
            self.territory_name.clone().into(),
            self.territory_short_name.clone().into(),
        ];
        params.extend(self.audit.params());
        params
    }
}

/// Body of `POST /districts`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NewDistrict {
    #[serde(rename = "CountryID")]
    pub country_id: i32,
    #[serde(rename = "TerritoryID")]
    pub territory_id: i32,
    #[serde(rename = "DistrictName")]
    pub district_name: String,
    #[serde(flatten)]
    pub audit: Audit,
}

impl NewDistrict {
    pub fn validate(&self) -> Result<(), AppError> {
        positive("CountryID", self.country_id)?;
        positive("TerritoryID", self.territory_id)?;
        required("DistrictName", &self.district_name)
    }

    pub fn params(&self) -> Vec<SqlValue> {
        let mut params: Vec<SqlValue> = vec![
            self.country_id.into(),
            self.territory_id.into(),
            self.district_name.clone().into(),
        ];
        params.extend(self.audit.params());
        params
    }
}

/// Body of `POST /seats`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NewSeat {
    #[serde(rename = "CountryID")]
    pub country_id: i32,
    #[serde(rename = "TerritoryID")]
    pub territory_id: i32,
    #[serde(rename = "DistricID")]
    pub district_id: i32,
    #[serde(rename = "SeatDescption")]
    pub seat_description: String,
    #[serde(flatten)]
    pub audit: Audit,
}

impl NewSeat {
    pub fn validate(&self) -> Result<(), AppError> {
        positive("CountryID", self.country_id)?;
        positive("TerritoryID", self.territory_id)?;
        positive("DistricID", self.district_id)?;
        required("SeatDescption", &self.seat_description)
    }

    pub fn params(&self) -> Vec<SqlValue> {
        let mut params: Vec<SqlValue> = vec![
            self.country_id.into(),
            self.territory_id.into(),
            self.district_id.into(),
            self.seat_description.clone().into(),
        ];
        params.extend(self.audit.params());
        params
    }
}

/// Body of `POST /citizens`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NewCitizen {
    #[serde(rename = "CountryID")]
    pub country_id: i32,
    #[serde(rename = "TerritoryID")]
    pub territory_id: i32,
    #[serde(rename = "DistrictID")]
    pub district_id: i32,
    #[serde(rename = "SeatID")]
    pub seat_id: i32,
    #[serde(rename = "CitizenName")]
    pub citizen_name: String,
    #[serde(rename = "NIC", default)]
    pub nic: Option<String>,
    #[serde(rename = "City", default)]
    pub city: Option<String>,
    #[serde(rename = "Address1", default)]
    pub address1: Option<String>,
    #[serde(rename = "Address2", default)]
    pub address2: Option<String>,
    #[serde(rename = "DOB", default)]
    pub dob: Option<NaiveDate>,
    #[serde(rename = "Job", default)]
    pub job: Option<String>,
    #[serde(rename = "Salary", default)]
    pub salary: Option<BigDecimal>,
    #[serde(rename = "MaritalStatus", default)]
    pub marital_status: Option<String>,
    #[serde(flatten)]
    pub audit: Audit,
}

impl NewCitizen {
    pub fn validate(&self) -> Result<(), AppError> {
        positive("CountryID", self.country_id)?;
        positive("TerritoryID", self.territory_id)?;
        positive("DistrictID", self.district_id)?;
        positive("SeatID", self.seat_id)?;
        required("CitizenName", &self.citizen_name)
    }

    pub fn params(&self) -> Vec<SqlValue> {
        let mut params: Vec<SqlValue> = vec![
            self.country_id.into(),
            self.territory_id.into(),
            self.district_id.into(),
            self.seat_id.into(),
            self.citizen_name.clone().into(),
            self.nic.clone().into(),
            self.city.clone().into(),
            self.address1.clone().into(),
            self.address2.clone().into(),
            self.dob.into(),
            self.job.clone().into(),
            self.salary.clone().into(),
            self.marital_status.clone().into(),
        ];
        params.extend(self.audit.params());
        params
    }
}

// ============ API Responses ============

/// Response of every create endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Created {
    pub message: String,
    pub id: u64,
}
