use diesel::prelude::*;

use crate::workflow::WorkflowError;
use crate::{models, schema};

/// Width of a page as rendered in the editor; all stored coordinates are
/// expressed in this frame. Other viewports rescale linearly.
pub const CANONICAL_PAGE_WIDTH: f64 = 800.0;

/// Where a field sits on the document. `x_position`/`y_position` is the
/// centre point of the rectangle, in canonical units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub page_number: i64,
    pub x_position: f64,
    pub y_position: f64,
    pub width: f64,
    pub height: f64,
}

impl Placement {
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.page_number < 1 {
            return Err(WorkflowError::Validation(
                "page_number must be 1 or greater".to_string(),
            ));
        }
        for v in [
            self.x_position,
            self.y_position,
            self.width,
            self.height,
        ] {
            if !v.is_finite() {
                return Err(WorkflowError::Validation(
                    "field coordinates must be finite numbers".to_string(),
                ));
            }
        }
        if self.x_position < 0.0 || self.y_position < 0.0 {
            return Err(WorkflowError::Validation(
                "field position cannot be negative".to_string(),
            ));
        }
        if self.width <= 0.0 || self.height <= 0.0 {
            return Err(WorkflowError::Validation(
                "field width and height must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Maps the placement into a viewport rendered at `viewport_width`. The
    /// same factor applies to both axes and both extents, so rectangles keep
    /// their aspect ratio.
    pub fn scale(&self, viewport_width: f64) -> Placement {
        let factor = viewport_width / CANONICAL_PAGE_WIDTH;
        Placement {
            page_number: self.page_number,
            x_position: self.x_position * factor,
            y_position: self.y_position * factor,
            width: self.width * factor,
            height: self.height * factor,
        }
    }
}

impl From<&models::SignatureField> for Placement {
    fn from(f: &models::SignatureField) -> Self {
        Placement {
            page_number: f.page_number,
            x_position: f.x_position,
            y_position: f.y_position,
            width: f.width,
            height: f.height,
        }
    }
}

/// All fields of a document, page order first, then creation order within a
/// page.
pub fn list(
    c: &diesel::PgConnection,
    document_id: uuid::Uuid,
) -> diesel::result::QueryResult<Vec<models::SignatureField>> {
    schema::signature_fields::dsl::signature_fields
        .filter(schema::signature_fields::dsl::document_id.eq(document_id))
        .order((
            schema::signature_fields::dsl::page_number.asc(),
            schema::signature_fields::dsl::created_at.asc(),
        ))
        .load::<models::SignatureField>(c)
}

pub fn get(
    c: &diesel::PgConnection,
    document_id: uuid::Uuid,
    field_id: uuid::Uuid,
) -> diesel::result::QueryResult<Option<models::SignatureField>> {
    schema::signature_fields::dsl::signature_fields
        .find(field_id)
        .filter(schema::signature_fields::dsl::document_id.eq(document_id))
        .first::<models::SignatureField>(c)
        .optional()
}

pub fn create(
    c: &diesel::PgConnection,
    document_id: uuid::Uuid,
    placement: Placement,
    signer_email: Option<String>,
) -> diesel::result::QueryResult<models::SignatureField> {
    let field = models::SignatureField {
        id: uuid::Uuid::new_v4(),
        document_id,
        page_number: placement.page_number,
        x_position: placement.x_position,
        y_position: placement.y_position,
        width: placement.width,
        height: placement.height,
        signer_email,
        status: schema::FieldStatus::Unsigned,
        signature_data: None,
        created_at: chrono::Utc::now().naive_utc(),
    };
    diesel::insert_into(schema::signature_fields::dsl::signature_fields)
        .values(&field)
        .execute(c)?;
    Ok(field)
}

pub fn assign(
    c: &diesel::PgConnection,
    field_id: uuid::Uuid,
    signer_email: Option<String>,
) -> diesel::result::QueryResult<models::SignatureField> {
    diesel::update(schema::signature_fields::dsl::signature_fields.find(field_id))
        .set(schema::signature_fields::dsl::signer_email.eq(signer_email))
        .get_result::<models::SignatureField>(c)
}

/// Writes the signature payload and flips the field to signed. The payload is
/// stored opaquely; nothing in the engine ever decodes it.
pub fn record_signature(
    c: &diesel::PgConnection,
    field_id: uuid::Uuid,
    signature_data: &str,
) -> diesel::result::QueryResult<models::SignatureField> {
    diesel::update(schema::signature_fields::dsl::signature_fields.find(field_id))
        .set((
            schema::signature_fields::dsl::status.eq(schema::FieldStatus::Signed),
            schema::signature_fields::dsl::signature_data.eq(Some(signature_data.to_string())),
        ))
        .get_result::<models::SignatureField>(c)
}

pub fn unsigned_count(
    c: &diesel::PgConnection,
    document_id: uuid::Uuid,
) -> diesel::result::QueryResult<i64> {
    schema::signature_fields::dsl::signature_fields
        .filter(schema::signature_fields::dsl::document_id.eq(document_id))
        .filter(schema::signature_fields::dsl::status.eq(schema::FieldStatus::Unsigned))
        .count()
        .get_result::<i64>(c)
}

pub fn count(
    c: &diesel::PgConnection,
    document_id: uuid::Uuid,
) -> diesel::result::QueryResult<i64> {
    schema::signature_fields::dsl::signature_fields
        .filter(schema::signature_fields::dsl::document_id.eq(document_id))
        .count()
        .get_result::<i64>(c)
}

pub fn delete(
    c: &diesel::PgConnection,
    field_id: uuid::Uuid,
) -> diesel::result::QueryResult<usize> {
    diesel::delete(schema::signature_fields::dsl::signature_fields.find(field_id)).execute(c)
}

/// Wipes every signature on the document and returns all fields to unsigned.
/// Only recall is allowed to do this.
pub fn reset_all(
    c: &diesel::PgConnection,
    document_id: uuid::Uuid,
) -> diesel::result::QueryResult<usize> {
    diesel::update(
        schema::signature_fields::dsl::signature_fields
            .filter(schema::signature_fields::dsl::document_id.eq(document_id)),
    )
    .set((
        schema::signature_fields::dsl::status.eq(schema::FieldStatus::Unsigned),
        schema::signature_fields::dsl::signature_data.eq(None::<String>),
    ))
    .execute(c)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn placement() -> Placement {
        Placement {
            page_number: 1,
            x_position: 100.0,
            y_position: 200.0,
            width: 150.0,
            height: 60.0,
        }
    }

    #[test]
    fn accepts_reasonable_placement() {
        assert!(placement().validate().is_ok());
    }

    #[test]
    fn rejects_page_zero() {
        let p = Placement {
            page_number: 0,
            ..placement()
        };
        assert!(matches!(p.validate(), Err(WorkflowError::Validation(_))));
    }

    #[test]
    fn rejects_zero_extent() {
        let p = Placement {
            width: 0.0,
            ..placement()
        };
        assert!(matches!(p.validate(), Err(WorkflowError::Validation(_))));
        let p = Placement {
            height: -4.0,
            ..placement()
        };
        assert!(matches!(p.validate(), Err(WorkflowError::Validation(_))));
    }

    #[test]
    fn rejects_non_finite_coordinates() {
        let p = Placement {
            x_position: f64::NAN,
            ..placement()
        };
        assert!(matches!(p.validate(), Err(WorkflowError::Validation(_))));
        let p = Placement {
            y_position: f64::INFINITY,
            ..placement()
        };
        assert!(matches!(p.validate(), Err(WorkflowError::Validation(_))));
    }

    #[test]
    fn rejects_negative_position() {
        let p = Placement {
            x_position: -1.0,
            ..placement()
        };
        assert!(matches!(p.validate(), Err(WorkflowError::Validation(_))));
    }

    #[test]
    fn scale_is_uniform() {
        let scaled = placement().scale(400.0);
        assert_eq!(scaled.page_number, 1);
        assert_eq!(scaled.x_position, 50.0);
        assert_eq!(scaled.y_position, 100.0);
        assert_eq!(scaled.width, 75.0);
        assert_eq!(scaled.height, 30.0);
    }

    #[test]
    fn scale_at_canonical_width_is_identity() {
        assert_eq!(placement().scale(CANONICAL_PAGE_WIDTH), placement());
    }
}
