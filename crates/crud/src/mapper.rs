use std::sync::Arc;

use crate::error::{Error, Result};
use crate::registration::{EntityInstance, EntityRegistration};
use crate::select::ROW_NUMBER_COLUMN;
use crate::value::{Row, is_null};

/// Splits flat rows into one instance per participant.
///
/// Segments follow the select list of the statement: each participant
/// contributes one field per mapped property, and every segment after the
/// first starts at its split-on column.
#[derive(Debug, Clone)]
pub struct RowMapper {
    participants: Vec<Arc<EntityRegistration>>,
    split_on: Vec<String>,
}

impl RowMapper {
    /// Mapper for rows of a single entity.
    #[must_use]
    pub fn single(registration: Arc<EntityRegistration>) -> Self {
        Self {
            participants: vec![registration],
            split_on: Vec::new(),
        }
    }

    /// Mapper for joined rows. `split_on` holds one column per participant
    /// after the root.
    ///
    /// # Errors
    ///
    /// Returns an error when the number of split-on columns does not match
    /// the participants.
    pub fn joined(participants: Vec<Arc<EntityRegistration>>, split_on: Vec<String>) -> Result<Self> {
        if participants.is_empty() || split_on.len() + 1 != participants.len() {
            return Err(Error::invalid_argument(
                "split_on",
                format!("{} split-on columns for {} entities", split_on.len(), participants.len()),
            ));
        }
        Ok(Self {
            participants,
            split_on,
        })
    }

    #[must_use]
    pub fn participants(&self) -> &[Arc<EntityRegistration>] {
        &self.participants
    }

    /// Maps one row. Segments of joined entities whose fields are all `NULL`
    /// map to `None`.
    ///
    /// # Errors
    ///
    /// Returns a conversion error when the row is shorter than the select
    /// list, a segment does not start at its split-on column, or a value
    /// cannot be converted.
    pub fn map(&self, row: &Row) -> Result<Vec<Option<EntityInstance>>> {
        let mut instances = Vec::with_capacity(self.participants.len());
        let mut start = 0;

        // legacy paging prepends the row number
        let row_fields = match row.fields.split_first() {
            Some((first, rest)) if first.name == ROW_NUMBER_COLUMN => rest,
            _ => row.fields.as_slice(),
        };

        for (slot, registration) in self.participants.iter().enumerate() {
            let end = start + registration.properties().len();
            let Some(fields) = row_fields.get(start..end) else {
                return Err(Error::conversion(format!(
                    "row has {} fields, {} expected for {}",
                    row_fields.len(),
                    end,
                    registration.entity_name()
                )));
            };

            if slot > 0 {
                let split_on = &self.split_on[slot - 1];
                if fields.first().is_none_or(|field| &field.name != split_on) {
                    return Err(Error::conversion(format!(
                        "{} does not start at split-on column `{split_on}`",
                        registration.entity_name()
                    )));
                }
            }

            let absent = slot > 0 && fields.iter().all(|field| is_null(&field.value));
            instances.push(if absent { None } else { Some(registration.instantiate(fields)?) });
            start = end;
        }
        Ok(instances)
    }
}

#[cfg(test)]
mod tests {
    use sea_query::Value;

    use super::*;
    use crate::property;
    use crate::registration::{Entity, EntityMapping};

    #[derive(Debug, Default)]
    struct Building {
        id: i32,
        name: String,
    }

    impl Entity for Building {
        fn mapping() -> EntityMapping<Self> {
            EntityMapping::new("Buildings")
                .property(property!(Building, id as "Id").primary_key())
                .property(property!(Building, name as "Name"))
        }
    }

    #[derive(Debug, Default)]
    struct Workstation {
        id: i64,
    }

    impl Entity for Workstation {
        fn mapping() -> EntityMapping<Self> {
            EntityMapping::new("Workstations").property(property!(Workstation, id as "Id").primary_key())
        }
    }

    fn mapper() -> RowMapper {
        RowMapper::joined(
            vec![Building::mapping().freeze().unwrap(), Workstation::mapping().freeze().unwrap()],
            vec!["Id".to_string()],
        )
        .unwrap()
    }

    #[test]
    fn splits_rows() {
        let row = Row::new().with("Id", 1).with("Name", "HQ").with("Id", 7_i64);
        let instances = mapper().map(&row).unwrap();
        assert_eq!(instances.len(), 2);

        let building = instances[0].as_ref().unwrap().downcast::<Building>().unwrap();
        assert_eq!(building.read().name, "HQ");
        let workstation = instances[1].as_ref().unwrap().downcast::<Workstation>().unwrap();
        assert_eq!(workstation.read().id, 7);
    }

    #[test]
    fn null_segments_are_absent() {
        let row = Row::new().with("Id", 1).with("Name", "HQ").with("Id", Value::BigInt(None));
        let instances = mapper().map(&row).unwrap();
        assert!(instances[1].is_none());
    }

    #[test]
    fn skips_legacy_row_number() {
        let row = Row::new().with("__RowNumber", 3_i64).with("Id", 1).with("Name", "HQ").with("Id", 7_i64);
        let instances = mapper().map(&row).unwrap();
        let building = instances[0].as_ref().unwrap().downcast::<Building>().unwrap();
        assert_eq!(building.read().id, 1);
    }

    #[test]
    fn mismatched_rows() {
        let short = Row::new().with("Id", 1).with("Name", "HQ");
        assert!(matches!(mapper().map(&short), Err(Error::Conversion { .. })));

        let misplaced = Row::new().with("Id", 1).with("Name", "HQ").with("Code", 7_i64);
        assert!(matches!(mapper().map(&misplaced), Err(Error::Conversion { .. })));
    }
}
