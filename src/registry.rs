use std::sync::Arc;

use crate::db::{Database, SqlValue};
use crate::errors::{AppError, ResultExt};
use crate::models::*;

const NO_PARAMS: &[SqlValue] = &[];

const COUNTRY_COLUMNS: &str = "CountryID, CountryName, Auser, Muser, Terminal";
const TERRITORY_COLUMNS: &str =
    "TerritoryID, CountryID, TerritoryName, TerritoryShortName, Auser, Muser, Terminal";
const DISTRICT_COLUMNS: &str =
    "DistrictID, CountryID, TerritoryID, DistrictName, Auser, Muser, Terminal";
const SEAT_COLUMNS: &str =
    "SeatID, CountryID, TerritoryID, DistricID, SeatDescption, Auser, Muser, Terminal";
const CITIZEN_COLUMNS: &str = "CitizenID, CountryID, TerritoryID, DistrictID, SeatID, CitizenName, NIC, City, \
     Address1, Address2, DOB, Job, Salary, MaritalStatus, Auser, Muser, Terminal";

/// Fixed statements over the registry tables.
///
/// Every method is a single statement through the query façade; nothing
/// here retries or spans a transaction.
#[derive(Clone)]
pub struct RegistryStorage {
    db: Arc<Database>,
}

impl RegistryStorage {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    // ---- Country ----

    pub async fn list_countries(&self) -> Result<Vec<Country>, AppError> {
        let sql = format!("SELECT {} FROM country ORDER BY CountryID", COUNTRY_COLUMNS);
        self.db.fetch_all(&sql, NO_PARAMS).await.context("listing countries")
    }

    pub async fn get_country(&self, id: i32) -> Result<Option<Country>, AppError> {
        let sql = format!("SELECT {} FROM country WHERE CountryID = ?", COUNTRY_COLUMNS);
        self.db
            .fetch_optional(&sql, &[SqlValue::from(id)])
            .await
            .with_context(|| format!("loading country {}", id))
    }

    /// Inserts a country and returns its id, which the caller supplies.
    pub async fn insert_country(&self, new: &NewCountry) -> Result<u64, AppError> {
        let done = self
            .db
            .execute(
                "INSERT INTO country (CountryID, CountryName, Auser, Muser, Terminal) VALUES (?, ?, ?, ?, ?)",
                &new.params(),
            )
            .await
            .context("inserting country")?;

        // CountryID is not AUTO_INCREMENT, so MySQL reports 0 as the insert id.
        if done.last_insert_id == 0 {
            return Ok(u64::try_from(new.country_id).unwrap_or_default());
        }
        Ok(done.last_insert_id)
    }

    // ---- Territory ----

    pub async fn territories_by_country(&self, country_id: i32) -> Result<Vec<Territory>, AppError> {
        let sql = format!(
            "SELECT {} FROM terrotory WHERE CountryID = ? ORDER BY TerritoryID",
            TERRITORY_COLUMNS
        );
        self.db
            .fetch_all(&sql, &[SqlValue::from(country_id)])
            .await
            .with_context(|| format!("listing territories of country {}", country_id))
    }

    pub async fn get_territory(&self, id: i32) -> Result<Option<Territory>, AppError> {
        let sql = format!("SELECT {} FROM terrotory WHERE TerritoryID = ?", TERRITORY_COLUMNS);
        self.db
            .fetch_optional(&sql, &[SqlValue::from(id)])
            .await
            .with_context(|| format!("loading territory {}", id))
    }

    pub async fn insert_territory(&self, new: &NewTerritory) -> Result<u64, AppError> {
        let done = self
            .db
            .execute(
                "INSERT INTO terrotory (CountryID, TerritoryName, TerritoryShortName, Auser, Muser, Terminal) VALUES (?, ?, ?, ?, ?, ?)",
                &new.params(),
            )
            .await
            .context("inserting territory")?;
        Ok(done.last_insert_id)
    }

    // ---- District ----

    pub async fn districts_by_territory(&self, territory_id: i32) -> Result<Vec<District>, AppError> {
        let sql = format!(
            "SELECT {} FROM district WHERE TerritoryID = ? ORDER BY DistrictID",
            DISTRICT_COLUMNS
        );
        self.db
            .fetch_all(&sql, &[SqlValue::from(territory_id)])
            .await
            .with_context(|| format!("listing districts of territory {}", territory_id))
    }

    pub async fn get_district(&self, id: i32) -> Result<Option<District>, AppError> {
        let sql = format!("SELECT {} FROM district WHERE DistrictID = ?", DISTRICT_COLUMNS);
        self.db
            .fetch_optional(&sql, &[SqlValue::from(id)])
            .await
            .with_context(|| format!("loading district {}", id))
    }

    pub async fn insert_district(&self, new: &NewDistrict) -> Result<u64, AppError> {
        let done = self
            .db
            .execute(
                "INSERT INTO district (CountryID, TerritoryID, DistrictName, Auser, Muser, Terminal) VALUES (?, ?, ?, ?, ?, ?)",
                &new.params(),
            )
            .await
            .context("inserting district")?;
        Ok(done.last_insert_id)
    }

    // ---- Seat ----

    pub async fn seats_by_district(&self, district_id: i32) -> Result<Vec<Seat>, AppError> {
        let sql = format!("SELECT {} FROM Seat WHERE DistricID = ? ORDER BY SeatID", SEAT_COLUMNS);
        self.db
            .fetch_all(&sql, &[SqlValue::from(district_id)])
            .await
            .with_context(|| format!("listing seats of district {}", district_id))
    }

    pub async fn get_seat(&self, id: i32) -> Result<Option<Seat>, AppError> {
        let sql = format!("SELECT {} FROM Seat WHERE SeatID = ?", SEAT_COLUMNS);
        self.db
            .fetch_optional(&sql, &[SqlValue::from(id)])
            .await
            .with_context(|| format!("loading seat {}", id))
    }

    pub async fn insert_seat(&self, new: &NewSeat) -> Result<u64, AppError> {
        let done = self
            .db
            .execute(
                "INSERT INTO Seat (CountryID, TerritoryID, DistricID, SeatDescption, Auser, Muser, Terminal) VALUES (?, ?, ?, ?, ?, ?, ?)",
                &new.params(),
            )
            .await
            .context("inserting seat")?;
        Ok(done.last_insert_id)
    }

    // ---- Citizen ----

    pub async fn citizens_by_district(&self, district_id: i32) -> Result<Vec<Citizen>, AppError> {
        self.citizens_where("DistrictID", district_id).await
    }

    pub async fn citizens_by_seat(&self, seat_id: i32) -> Result<Vec<Citizen>, AppError> {
        self.citizens_where("SeatID", seat_id).await
    }

    async fn citizens_where(&self, column: &'static str, id: i32) -> Result<Vec<Citizen>, AppError> {
        let sql = format!(
            "SELECT {} FROM citizens WHERE {} = ? ORDER BY CitizenID",
            CITIZEN_COLUMNS, column
        );
        self.db
            .fetch_all(&sql, &[SqlValue::from(id)])
            .await
            .with_context(|| format!("listing citizens by {} {}", column, id))
    }

    pub async fn get_citizen(&self, id: i32) -> Result<Option<Citizen>, AppError> {
        let sql = format!("SELECT {} FROM citizens WHERE CitizenID = ?", CITIZEN_COLUMNS);
        self.db
            .fetch_optional(&sql, &[SqlValue::from(id)])
            .await
            .with_context(|| format!("loading citizen {}", id))
    }

    pub async fn insert_citizen(&self, new: &NewCitizen) -> Result<u64, AppError> {
        let done = self
            .db
            .execute(
                "INSERT INTO citizens (CountryID, TerritoryID, DistrictID, SeatID, CitizenName, NIC, City, Address1, Address2, DOB, Job, Salary, MaritalStatus, Auser, Muser, Terminal) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                &new.params(),
            )
            .await
            .context("inserting citizen")?;
        Ok(done.last_insert_id)
    }
}
