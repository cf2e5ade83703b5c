use super::{Dictionary, Document, Object, Result};

#[cfg(feature = "chrono")]
mod chrono_impl {
    use crate::{Object, datetime::convert_utc_offset};
    use chrono::prelude::*;

    impl From<DateTime<Local>> for Object {
        fn from(date: DateTime<Local>) -> Self {
            let mut timezone_str = date.format("D:%Y%m%d%H%M%S%:z'").to_string().into_bytes();
            convert_utc_offset(&mut timezone_str);
            Object::string_literal(timezone_str)
        }
    }

    impl From<DateTime<Utc>> for Object {
        fn from(date: DateTime<Utc>) -> Self {
            Object::string_literal(date.format("D:%Y%m%d%H%M%SZ").to_string())
        }
    }

    impl TryFrom<super::DateTime> for DateTime<Local> {
        type Error = chrono::format::ParseError;

        fn try_from(value: super::DateTime) -> Result<DateTime<Local>, Self::Error> {
            let from_date = |date: NaiveDate| date.and_time(NaiveTime::MIN).and_utc().fixed_offset();

            DateTime::parse_from_str(&value.0, "%Y%m%d%H%M%S%#z")
                .or_else(|_| DateTime::parse_from_str(&value.0, "%Y%m%d%H%M%#z"))
                .or_else(|_| NaiveDate::parse_from_str(&value.0, "%Y%m%d").map(from_date))
                .map(|date| date.with_timezone(&Local))
        }
    }
}

// Find the last `:` and turn it into an `'` to account for PDF weirdness
#[cfg_attr(not(feature = "chrono"), allow(dead_code))]
fn convert_utc_offset(bytes: &mut [u8]) {
    if let Some(last) = bytes.iter_mut().rev().find(|b| **b == b':') {
        *last = b'\'';
    }
}

/// The digits and offset of a PDF date string (`D:YYYYMMDDHHmmSSOHH'mm'`).
#[derive(Clone, Debug)]
pub struct DateTime(String);

impl Object {
    // Parses the `D`, `:` and `'` out of a `Object::String` to parse the date time
    fn datetime_string(&self) -> Option<String> {
        if let Object::String(bytes, _) = self {
            String::from_utf8(
                bytes
                    .iter()
                    .filter(|b| ![b'D', b':', b'\''].contains(b))
                    .cloned()
                    .collect(),
            )
            .ok()
        } else {
            None
        }
    }

    pub fn as_datetime(&self) -> Option<DateTime> {
        self.datetime_string().map(DateTime)
    }
}

impl Document {
    /// Set `ModDate` in the `Info` dictionary to now, creating the dictionary if needed.
    pub fn stamp_modification_date(&mut self) -> Result<()> {
        #[cfg(feature = "chrono")]
        {
            let now: Object = chrono::Utc::now().into();
            self.set_info_entry("ModDate", now)
        }
        #[cfg(not(feature = "chrono"))]
        {
            log::warn!("built without date support, ModDate left unchanged");
            Ok(())
        }
    }

    /// Set one entry of the document information dictionary.
    pub fn set_info_entry<V: Into<Object>>(&mut self, key: &str, value: V) -> Result<()> {
        match self.trailer.get(b"Info") {
            Ok(Object::Reference(id)) => {
                let id = *id;
                self.get_dictionary_mut(id)?.set(key, value);
            }
            Ok(Object::Dictionary(_)) => {
                self.trailer.get_mut(b"Info")?.as_dict_mut()?.set(key, value);
            }
            _ => {
                let mut info = Dictionary::new();
                info.set(key, value);
                let id = self.add_object(info);
                self.trailer.set("Info", id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_dictionary_is_created_on_demand() {
        let mut doc = Document::new();
        doc.set_info_entry("Producer", Object::string_literal("pdfgraft")).unwrap();
        let info_id = doc.trailer.get(b"Info").unwrap().as_reference().unwrap();
        assert_eq!(
            doc.get_dictionary(info_id).unwrap().get(b"Producer").unwrap().as_str().unwrap(),
            b"pdfgraft"
        );
        doc.set_info_entry("Creator", Object::string_literal("tests")).unwrap();
        assert_eq!(doc.get_dictionary(info_id).unwrap().len(), 2);
    }

    #[cfg(feature = "chrono")]
    #[test]
    fn parse_datetime_local() {
        use chrono::prelude::*;

        let time = Local::now().with_nanosecond(0).unwrap();
        let text: Object = time.into();
        let time2: Option<DateTime<Local>> = text.as_datetime().and_then(|dt| dt.try_into().ok());
        assert_eq!(time2, Some(time));
    }

    #[cfg(feature = "chrono")]
    #[test]
    fn parse_datetime_utc() {
        use chrono::prelude::*;

        let time = Utc::now().with_nanosecond(0).unwrap();
        let text: Object = time.into();
        let time2: Option<DateTime<Local>> = text.as_datetime().and_then(|dt| dt.try_into().ok());
        assert_eq!(time2, Some(time.with_timezone(&Local)));
    }

    #[cfg(feature = "chrono")]
    #[test]
    fn parse_datetime_seconds_missing() {
        use chrono::prelude::*;

        // this is the example from the PDF reference, version 1.7, chapter 3.8.3
        let text = Object::string_literal("D:199812231952-08'00'");
        let dt: Option<DateTime<Local>> = text.as_datetime().and_then(|dt| dt.try_into().ok());
        assert!(dt.is_some());
    }

    #[cfg(feature = "chrono")]
    #[test]
    fn parse_datetime_time_missing() {
        use chrono::prelude::*;

        let text = Object::string_literal("D:20040229");
        let dt: Option<DateTime<Local>> = text.as_datetime().and_then(|dt| dt.try_into().ok());
        assert!(dt.is_some());
    }
}
