//! Field name registry for STAR metadata
//!
//! This module contains the RELION and UCSF field names, their semantic
//! groupings and the canonical field order used when writing files.

// =============================================================================
// RELION Fields
// =============================================================================

/// Native RELION field names
pub mod relion {
    pub const MICROGRAPH_NAME: &str = "rlnMicrographName";
    pub const MICROGRAPH_NAME_NODW: &str = "rlnMicrographNameNoDW";
    pub const IMAGE_NAME: &str = "rlnImageName";
    pub const IMAGE_ORIGINAL_NAME: &str = "rlnImageOriginalName";
    pub const RECONSTRUCT_IMAGE_NAME: &str = "rlnReconstructImageName";
    pub const COORDX: &str = "rlnCoordinateX";
    pub const COORDY: &str = "rlnCoordinateY";
    pub const ORIGINX: &str = "rlnOriginX";
    pub const ORIGINY: &str = "rlnOriginY";
    pub const ORIGINZ: &str = "rlnOriginZ";
    pub const ANGLEROT: &str = "rlnAngleRot";
    pub const ANGLETILT: &str = "rlnAngleTilt";
    pub const ANGLEPSI: &str = "rlnAnglePsi";
    pub const CLASS: &str = "rlnClassNumber";
    pub const DEFOCUSU: &str = "rlnDefocusU";
    pub const DEFOCUSV: &str = "rlnDefocusV";
    pub const DEFOCUSANGLE: &str = "rlnDefocusAngle";
    pub const CS: &str = "rlnSphericalAberration";
    pub const PHASESHIFT: &str = "rlnPhaseShift";
    pub const AC: &str = "rlnAmplitudeContrast";
    pub const VOLTAGE: &str = "rlnVoltage";
    pub const MAGNIFICATION: &str = "rlnMagnification";
    pub const DETECTORPIXELSIZE: &str = "rlnDetectorPixelSize";
    pub const BEAMTILTX: &str = "rlnBeamTiltX";
    pub const BEAMTILTY: &str = "rlnBeamTiltY";
    pub const BEAMTILTCLASS: &str = "rlnBeamTiltClass";
    pub const CTFSCALEFACTOR: &str = "rlnCtfScalefactor";
    pub const CTFBFACTOR: &str = "rlnCtfBfactor";
    pub const CTFMAXRESOLUTION: &str = "rlnCtfMaxResolution";
    pub const CTFFIGUREOFMERIT: &str = "rlnCtfFigureOfMerit";
    pub const GROUPNUMBER: &str = "rlnGroupNumber";
    pub const OPTICSGROUP: &str = "rlnOpticsGroup";
    pub const RANDOMSUBSET: &str = "rlnRandomSubset";
    pub const AUTOPICKFIGUREOFMERIT: &str = "rlnAutopickFigureOfMerit";
    pub const ODDZERNIKE: &str = "rlnOddZernike";
    pub const EVENZERNIKE: &str = "rlnEvenZernike";
    pub const MAGMAT00: &str = "rlnMagMat00";
    pub const MAGMAT01: &str = "rlnMagMat01";
    pub const MAGMAT10: &str = "rlnMagMat10";
    pub const MAGMAT11: &str = "rlnMagMat11";

    pub const DEFOCUS: &[&str] = &[DEFOCUSU, DEFOCUSV];
    pub const COORDS: &[&str] = &[COORDX, COORDY];
    pub const ORIGINS: &[&str] = &[ORIGINX, ORIGINY];
    pub const ORIGINS3D: &[&str] = &[ORIGINX, ORIGINY, ORIGINZ];
    pub const ANGLES: &[&str] = &[ANGLEROT, ANGLETILT, ANGLEPSI];

    /// Angles followed by the 3D origins
    pub const ALIGNMENTS: &[&str] = &[ANGLEROT, ANGLETILT, ANGLEPSI, ORIGINX, ORIGINY, ORIGINZ];

    pub const CTF_PARAMS: &[&str] = &[
        DEFOCUSU,
        DEFOCUSV,
        DEFOCUSANGLE,
        CS,
        PHASESHIFT,
        AC,
        BEAMTILTX,
        BEAMTILTY,
        BEAMTILTCLASS,
        CTFSCALEFACTOR,
        CTFBFACTOR,
        CTFMAXRESOLUTION,
        CTFFIGUREOFMERIT,
    ];

    pub const MICROSCOPE_PARAMS: &[&str] = &[VOLTAGE, MAGNIFICATION, DETECTORPIXELSIZE];

    pub const MICROGRAPH_COORDS: &[&str] = &[MICROGRAPH_NAME, COORDX, COORDY];

    pub const PICK_PARAMS: &[&str] = &[
        MICROGRAPH_NAME,
        COORDX,
        COORDY,
        ANGLEPSI,
        CLASS,
        AUTOPICKFIGUREOFMERIT,
    ];

    /// Canonical column order for written files
    pub const FIELD_ORDER: &[&str] = &[
        IMAGE_NAME,
        IMAGE_ORIGINAL_NAME,
        MICROGRAPH_NAME,
        MICROGRAPH_NAME_NODW,
        COORDX,
        COORDY,
        ANGLEROT,
        ANGLETILT,
        ANGLEPSI,
        ORIGINX,
        ORIGINY,
        ORIGINZ,
        VOLTAGE,
        MAGNIFICATION,
        DETECTORPIXELSIZE,
        DEFOCUSU,
        DEFOCUSV,
        DEFOCUSANGLE,
        CS,
        PHASESHIFT,
        AC,
        BEAMTILTX,
        BEAMTILTY,
        BEAMTILTCLASS,
        CTFSCALEFACTOR,
        CTFBFACTOR,
        CTFMAXRESOLUTION,
        CTFFIGUREOFMERIT,
        CLASS,
        GROUPNUMBER,
        RANDOMSUBSET,
    ];

    /// Fields introduced by RELION 3. Informational only.
    pub const RELION3: &[&str] = &[
        BEAMTILTX,
        BEAMTILTY,
        BEAMTILTCLASS,
        OPTICSGROUP,
        ODDZERNIKE,
        EVENZERNIKE,
        MAGMAT00,
        MAGMAT01,
        MAGMAT10,
        MAGMAT11,
    ];
}

// =============================================================================
// UCSF Derived Fields
// =============================================================================

/// Synthetic fields derived from RELION fields during augmentation
pub mod ucsf {
    pub const IMAGE_PATH: &str = "ucsfImagePath";
    pub const IMAGE_BASENAME: &str = "ucsfImageBasename";
    pub const IMAGE_INDEX: &str = "ucsfImageIndex";
    pub const IMAGE_ORIGINAL_PATH: &str = "ucsfImageOriginalPath";
    pub const IMAGE_ORIGINAL_BASENAME: &str = "ucsfImageOriginalBasename";
    pub const IMAGE_ORIGINAL_INDEX: &str = "ucsfImageOriginalIndex";
    pub const MICROGRAPH_BASENAME: &str = "ucsfMicrographBasename";
    pub const UID: &str = "ucsfUid";
    pub const PARTICLE_UID: &str = "ucsfParticleUid";
    pub const MICROGRAPH_UID: &str = "ucsfMicrographUid";
}

/// Substrings marking synthetic columns that are dropped on simplify
pub const DERIVED_FIELD_MARKERS: &[&str] = &["ucsf", "eman"];

/// Bookkeeping row index column dropped on simplify
pub const INDEX_COLUMN: &str = "index";

/// Fallback substring used to find class columns such as `rlnClassNumber #12`
pub const CLASS_MARKER: &str = relion::CLASS;

/// File extension appended by the writer
pub const STAR_EXTENSION: &str = ".star";

/// Data block name written in the header
pub const DATA_BLOCK_NAME: &str = "data_images";

/// Default share of primary records that must match for a merge key
pub const DEFAULT_MERGE_THRESHOLD: f64 = 0.5;

/// Returns true for synthetic columns (`ucsf*`, `eman*`)
pub fn is_derived_field(name: &str) -> bool {
    DERIVED_FIELD_MARKERS
        .iter()
        .any(|marker| name.contains(marker))
}

/// Logical roles of frequently used columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldRole {
    ImageName,
    ImageOriginalName,
    MicrographName,
    CoordinateX,
    CoordinateY,
    OriginX,
    OriginY,
    OriginZ,
    AngleRot,
    AngleTilt,
    AnglePsi,
    ClassNumber,
    DefocusU,
    DefocusV,
    DefocusAngle,
    Magnification,
    DetectorPixelSize,
    ImagePath,
    ImageBasename,
    ImageIndex,
    ImageOriginalPath,
    ImageOriginalBasename,
    ImageOriginalIndex,
    MicrographBasename,
}

impl FieldRole {
    /// Literal column name for this role
    pub fn name(self) -> &'static str {
        match self {
            FieldRole::ImageName => relion::IMAGE_NAME,
            FieldRole::ImageOriginalName => relion::IMAGE_ORIGINAL_NAME,
            FieldRole::MicrographName => relion::MICROGRAPH_NAME,
            FieldRole::CoordinateX => relion::COORDX,
            FieldRole::CoordinateY => relion::COORDY,
            FieldRole::OriginX => relion::ORIGINX,
            FieldRole::OriginY => relion::ORIGINY,
            FieldRole::OriginZ => relion::ORIGINZ,
            FieldRole::AngleRot => relion::ANGLEROT,
            FieldRole::AngleTilt => relion::ANGLETILT,
            FieldRole::AnglePsi => relion::ANGLEPSI,
            FieldRole::ClassNumber => relion::CLASS,
            FieldRole::DefocusU => relion::DEFOCUSU,
            FieldRole::DefocusV => relion::DEFOCUSV,
            FieldRole::DefocusAngle => relion::DEFOCUSANGLE,
            FieldRole::Magnification => relion::MAGNIFICATION,
            FieldRole::DetectorPixelSize => relion::DETECTORPIXELSIZE,
            FieldRole::ImagePath => ucsf::IMAGE_PATH,
            FieldRole::ImageBasename => ucsf::IMAGE_BASENAME,
            FieldRole::ImageIndex => ucsf::IMAGE_INDEX,
            FieldRole::ImageOriginalPath => ucsf::IMAGE_ORIGINAL_PATH,
            FieldRole::ImageOriginalBasename => ucsf::IMAGE_ORIGINAL_BASENAME,
            FieldRole::ImageOriginalIndex => ucsf::IMAGE_ORIGINAL_INDEX,
            FieldRole::MicrographBasename => ucsf::MICROGRAPH_BASENAME,
        }
    }

    /// Find the role whose literal name is `name`
    pub fn from_name(name: &str) -> Option<Self> {
        ALL_ROLES.iter().copied().find(|role| role.name() == name)
    }
}

const ALL_ROLES: &[FieldRole] = &[
    FieldRole::ImageName,
    FieldRole::ImageOriginalName,
    FieldRole::MicrographName,
    FieldRole::CoordinateX,
    FieldRole::CoordinateY,
    FieldRole::OriginX,
    FieldRole::OriginY,
    FieldRole::OriginZ,
    FieldRole::AngleRot,
    FieldRole::AngleTilt,
    FieldRole::AnglePsi,
    FieldRole::ClassNumber,
    FieldRole::DefocusU,
    FieldRole::DefocusV,
    FieldRole::DefocusAngle,
    FieldRole::Magnification,
    FieldRole::DetectorPixelSize,
    FieldRole::ImagePath,
    FieldRole::ImageBasename,
    FieldRole::ImageIndex,
    FieldRole::ImageOriginalPath,
    FieldRole::ImageOriginalBasename,
    FieldRole::ImageOriginalIndex,
    FieldRole::MicrographBasename,
];

/// Resolve the class label column.
///
/// An exact `rlnClassNumber` column wins. Otherwise the first column whose
/// name contains the class marker is used, which covers index-suffixed
/// headers read with `keep_index`.
pub fn find_class_column<'a, I>(names: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let names: Vec<&str> = names.into_iter().collect();
    if let Some(name) = names.iter().find(|n| **n == FieldRole::ClassNumber.name()) {
        return Some((*name).to_string());
    }
    names
        .into_iter()
        .find(|n| n.contains(CLASS_MARKER))
        .map(str::to_string)
}

/// Derive the "Original" counterpart of a field name.
///
/// The token after the lowercase prefix gets `Original` appended, so
/// `rlnImageName` becomes `rlnImageOriginalName` and `ucsfImagePath`
/// becomes `ucsfImageOriginalPath`. Names without a capitalised token are
/// returned unchanged.
pub fn original_field(field: &str) -> String {
    let Some(first_upper) = field.find(|c: char| c.is_ascii_uppercase()) else {
        return field.to_string();
    };
    let (lead, rest) = field.split_at(first_upper);
    let token_end = rest
        .char_indices()
        .skip(1)
        .find(|(_, c)| !c.is_ascii_lowercase())
        .map(|(i, _)| i)
        .unwrap_or(rest.len());
    let (token, tail) = rest.split_at(token_end);
    format!("{}{}Original{}", lead, token, tail)
}
