//! Staff lookups shared by the ledgers and the payroll orchestrator.

use crate::{
    entities::{Staff, staff},
    errors::{Error, Result},
};
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder};

/// Loads a staff member, failing with [`Error::NotFound`] when absent.
pub async fn get_staff<C>(db: &C, staff_id: i64) -> Result<staff::Model>
where
    C: ConnectionTrait,
{
    Staff::find_by_id(staff_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("Staff", staff_id))
}

/// Staff paid by a run: active or on leave, optionally limited to one department.
/// Ordered by id so runs are reproducible.
pub async fn get_payable_staff<C>(db: &C, department: Option<&str>) -> Result<Vec<staff::Model>>
where
    C: ConnectionTrait,
{
    let mut query = Staff::find().filter(
        staff::Column::Status.is_in([staff::StaffStatus::Active, staff::StaffStatus::OnLeave]),
    );
    if let Some(department) = department {
        query = query.filter(staff::Column::Department.eq(department));
    }
    query
        .order_by_asc(staff::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Staff in `Active` status, ordered by id.
pub async fn get_active_staff<C>(db: &C) -> Result<Vec<staff::Model>>
where
    C: ConnectionTrait,
{
    Staff::find()
        .filter(staff::Column::Status.eq(staff::StaffStatus::Active))
        .order_by_asc(staff::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}
