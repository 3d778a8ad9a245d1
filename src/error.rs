use quick_error::quick_error;
use std::io::Error as IOError;

quick_error! {
    /// Error type for all error variants originated by this crate.
    #[derive(Debug)]
    pub enum AtlasGenError {
        /// No route to the atlas host, checked before the first download.
        NoInternetConnection {
            display("No internet connection")
        }

        /// A downloaded file did not match its known checksum.
        ChecksumMismatch(filename: String, expected: String, actual: String) {
            display("Checksum mismatch for '{}': expected md5 {}, got {}", filename, expected, actual)
        }

        /// Malformed line or duplicate id in the whitespace-delimited color table.
        InvalidLabelTable(msg: String) {
            display("Invalid label color table: {}", msg)
        }

        /// A structure's ancestor path names a parent that is not in the table.
        MissingParentStructure(id: i64, parent: i64) {
            display("Structure {} references unknown parent {}", id, parent)
        }

        /// Mesh file could not be parsed as OBJ or legacy binary VTK polydata.
        InvalidMeshFormat(msg: String) {
            display("Invalid mesh file: {}", msg)
        }

        /// The annotation volume does not look like an integer label image.
        InvalidAnnotationVolume(msg: String) {
            display("Invalid annotation volume: {}", msg)
        }

        /// A NIfTI volume was not three-dimensional.
        UnexpectedVolumeDimensionality(filename: String, ndim: usize) {
            display("Volume '{}' is {}-dimensional, expected 3", filename, ndim)
        }

        /// I/O Error
        Io(err: IOError) {
            from()
            source(err)
            display("I/O error: {}", err)
        }

        /// HTTP error from the download client.
        Http(err: Box<ureq::Error>) {
            from(err: ureq::Error) -> (Box::new(err))
            source(&**err)
            display("HTTP request failed: {}", err)
        }

        /// Error from the csv reader used for the full-name table.
        Csv(err: csv::Error) {
            from()
            source(err)
            display("CSV error: {}", err)
        }

        /// Error from the NIfTI reader.
        Nifti(err: nifti::NiftiError) {
            from()
            source(err)
            display("NIfTI error: {}", err)
        }

        /// JSON serialization error while writing package files.
        Json(err: serde_json::Error) {
            from()
            source(err)
            display("JSON error: {}", err)
        }
    }
}

/// Alias type for results originated from this crate.
pub type Result<T> = ::std::result::Result<T, AtlasGenError>;
